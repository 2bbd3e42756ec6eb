//! HTTP front-end for correlated submissions.
//!
//! ```text
//! POST   /computations        raw image body  → 202 {"id": "..."}
//! GET    /computations        every tracked request
//! GET    /computations/{id}   one request      → 200 | 404
//! DELETE /computations/{id}   forget a request → 204 | 404
//! GET    /health              liveness
//! ```

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use prism_core::{CorrelationId, Correlator, PrismError, WaitSnapshot};
use serde::Serialize;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    correlator: Arc<Correlator>,
}

impl AppState {
    pub fn new(correlator: Arc<Correlator>) -> Self {
        Self { correlator }
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(state: AppState, max_upload_bytes: usize) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/computations", get(list_handler).post(submit_handler))
        .route("/computations/{id}", get(status_handler).delete(retire_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct Submitted {
    pub id: CorrelationId,
}

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<PrismError> for ApiError {
    fn from(error: PrismError) -> Self {
        let status = if error.is_per_message() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, error.to_string())
    }
}

/// Accept an image and start waiting for its colour.
pub async fn submit_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Submitted>), ApiError> {
    if body.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "No image data received"));
    }
    let id = state.correlator.submit(body.to_vec())?;
    Ok((StatusCode::ACCEPTED, Json(Submitted { id })))
}

pub async fn list_handler(State(state): State<AppState>) -> Json<Vec<WaitSnapshot>> {
    Json(state.correlator.snapshots())
}

pub async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WaitSnapshot>, ApiError> {
    let id = CorrelationId::from(id);
    state
        .correlator
        .snapshot(&id)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Unknown request {}", id)))
}

pub async fn retire_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = CorrelationId::from(id);
    if state.correlator.retire(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("Unknown request {}", id),
        ))
    }
}

/// Health check handler.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use prism_core::config::RoutingConfig;
    use prism_core::{CorrelatorOptions, InMemoryBroker};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let options = CorrelatorOptions {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            retention: Duration::from_secs(60),
        };
        AppState::new(Arc::new(Correlator::new(
            Arc::new(InMemoryBroker::new()),
            RoutingConfig::default(),
            options,
        )))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_200_ok() {
        let (status, body) = health_handler().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let app = build_router(test_state(), 1024);
        let response = app
            .oneshot(
                Request::post("/computations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "No image data received");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let app = build_router(test_state(), 16);
        let response = app
            .oneshot(
                Request::post("/computations")
                    .body(Body::from(vec![1u8; 64]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn submit_then_query() {
        let state = test_state();
        let app = build_router(state.clone(), 1024);

        let response = app
            .clone()
            .oneshot(
                Request::post("/computations")
                    .body(Body::from(vec![1u8; 500]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/computations/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = body_json(response).await;
        assert_eq!(snapshot["id"], id.as_str());
        assert_eq!(snapshot["state"], "pending");
        assert_eq!(snapshot["size_kb"], 0.5);

        let response = app
            .oneshot(Request::get("/computations").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let list = body_json(response).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_id_is_404() {
        let app = build_router(test_state(), 1024);
        let response = app
            .clone()
            .oneshot(
                Request::get("/computations/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::delete("/computations/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retire_forgets_request() {
        let state = test_state();
        let id = state.correlator.submit(b"image".to_vec()).unwrap();
        let status = retire_handler(State(state.clone()), Path(id.to_string()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.correlator.snapshot(&id).is_none());
    }
}
