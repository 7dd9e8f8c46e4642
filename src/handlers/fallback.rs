use crate::core::error::ServiceError;

pub async fn fallback_handler() -> ServiceError {
    ServiceError::NotFound
}
