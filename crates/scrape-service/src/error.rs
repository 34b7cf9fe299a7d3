use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scrape_types::CoreError;
use serde_json::json;
use tracing::error;

/// The only error kinds the API surface exposes. Everything else (store
/// unavailability, remote cache trouble, transparent upstream errors) is
/// logged and collapsed into a plain 500 — callers never need to branch on
/// an internal failure mode they can't act on.
#[derive(Debug)]
pub enum ApiError {
    InvalidInput(String),
    NotFound(String),
    InvalidTransition(String),
    JobNotCompleted(String),
    QueueFull(u64),
    Internal,
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            CoreError::NotFound(id) => ApiError::NotFound(id),
            CoreError::InvalidTransition { id, from, to } => {
                ApiError::InvalidTransition(format!("job {id} cannot move from {from} to {to}"))
            }
            CoreError::JobNotCompleted(id) => ApiError::JobNotCompleted(id),
            CoreError::QueueFull(capacity) => ApiError::QueueFull(capacity),
            other @ (CoreError::StoreUnavailable(_)
            | CoreError::RemoteUnavailable
            | CoreError::DuplicateId(_)
            | CoreError::Other(_)) => {
                error!(%other, "internal error surfaced to API boundary");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg),
            ApiError::NotFound(id) => (StatusCode::NOT_FOUND, "NOT_FOUND", format!("job {id} not found")),
            ApiError::InvalidTransition(msg) => (StatusCode::CONFLICT, "INVALID_TRANSITION", msg),
            ApiError::JobNotCompleted(id) => (
                StatusCode::CONFLICT,
                "JOB_NOT_COMPLETED",
                format!("job {id} has not reached a completed terminal state"),
            ),
            ApiError::QueueFull(capacity) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "QUEUE_FULL",
                format!("queue is at capacity ({capacity} jobs)"),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "internal error".to_string(),
            ),
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_unavailable_collapses_to_internal() {
        let err: ApiError = CoreError::StoreUnavailable("pool exhausted".to_string()).into();
        assert!(matches!(err, ApiError::Internal));
    }

    #[test]
    fn not_found_is_passed_through() {
        let err: ApiError = CoreError::NotFound("abc".to_string()).into();
        assert!(matches!(err, ApiError::NotFound(id) if id == "abc"));
    }

    #[test]
    fn queue_full_response_is_service_unavailable() {
        let response = ApiError::QueueFull(100).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn not_found_response_is_404() {
        let response = ApiError::NotFound("abc".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
