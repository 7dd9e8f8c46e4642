// Centralized error handling for the controller and the control surface

use crate::engine::EngineError;
use crate::models::api::ErrorResponse;
use crate::models::transfer::FingerprintError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

/// Errors that can occur while executing a command
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("Failed to allocate stream server: {0}")]
    Allocation(#[source] std::io::Error),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Controller is not running")]
    Unavailable,
}

/// Errors returned by the HTTP control surface
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Controller is not running")]
    Unavailable,

    #[error("Invalid endpoint. Valid endpoints: /command, /events, /health")]
    NotFound,
}

impl From<ControllerError> for ServiceError {
    fn from(_: ControllerError) -> Self {
        // Command failures travel inside the response body; only a dead
        // controller surfaces as a transport error
        ServiceError::Unavailable
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::NotFound => StatusCode::NOT_FOUND,
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
