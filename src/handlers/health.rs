use crate::core::state::AppState;
use crate::models::api::HealthResponse;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Health check handler
///
/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            ready: state.controller.is_ready(),
            timestamp,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::tests::test_app;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    async fn health(state: Arc<AppState>) -> HealthResponse {
        let response = health_handler(State(state)).await.into_response();

        let (parts, body) = response.into_parts();
        assert_eq!(parts.status, StatusCode::OK);

        let body = Body::new(body);
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_ready() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        tokio::task::yield_now().await;

        let mut ready = health(app.state.clone()).await;
        while !ready.ready {
            tokio::task::yield_now().await;
            ready = health(app.state.clone()).await;
        }

        assert_eq!(ready.status, "ok");
        assert!(ready.timestamp > 0);
    }

    #[tokio::test]
    async fn test_health_not_ready_after_stop() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        app.cancel.cancel();
        app.task.await.unwrap();

        let health = health(app.state.clone()).await;
        assert_eq!(health.status, "ok");
        assert!(!health.ready);
    }
}
