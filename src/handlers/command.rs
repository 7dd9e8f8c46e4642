use crate::core::error::ServiceError;
use crate::core::state::AppState;
use crate::models::command::{Request, Response};
use axum::{extract::State, Json};
use std::sync::Arc;

/// Run one controller command
///
/// POST /command
pub async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<Request>,
) -> Result<Json<Response>, ServiceError> {
    let response = state.controller.dispatch(request).await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use crate::core::routes::build_router;
    use crate::core::state::tests::test_app;
    use crate::engine::mock::fp;
    use crate::models::command::Response;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn post(body: String) -> Request<Body> {
        Request::post("/command")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_check_transfer_command() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        let router = build_router(app.state.clone());

        let body = format!(
            r#"{{"id":"c1","command":"check-transfer","transferId":"{}"}}"#,
            fp(1)
        );
        let response = router.oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let response: Response = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(response, Response::ok("c1".to_string(), None));
        assert!(app.engine.is_active(&fp(1)));
    }

    #[tokio::test]
    async fn test_command_error_in_body() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        let router = build_router(app.state.clone());

        let body = r#"{"id":"s1","command":"seed-transfer","fingerprint":"nope"}"#.to_string();
        let response = router.oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["id"], "s1");
        assert!(json["error"].is_string());
        assert!(json["result"].is_null());
    }

    #[tokio::test]
    async fn test_malformed_command_rejected() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        let router = build_router(app.state.clone());

        let body = r#"{"id":"x","command":"reticulate-splines"}"#.to_string();
        let response = router.oneshot(post(body)).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_stopped_controller_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        app.cancel.cancel();
        app.task.await.unwrap();
        let router = build_router(app.state.clone());

        let body = r#"{"id":"r","command":"release-stream"}"#.to_string();
        let response = router.oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
