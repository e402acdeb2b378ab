//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code.
//!
//! Internal errors (database, migrations, corrupt rows) are logged with full
//! detail but only a generic message is returned to the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use batcher_core::BatchError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// All errors that can occur in the batcher-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the batch core.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Batch(e) => match e {
                BatchError::EmptyCombinations | BatchError::TooManyCombinations { .. } => {
                    (StatusCode::BAD_REQUEST, e.to_string())
                }
                BatchError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
                BatchError::AlreadyRunning(_) | BatchError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, e.to_string())
                }
                BatchError::Database(_)
                | BatchError::Migrate(_)
                | BatchError::Serialization(_)
                | BatchError::InvalidRecord { .. } => {
                    error!(error = %e, "batch store error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_owned(),
                    )
                }
            },
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<validator::ValidationErrors> for ServerError {
    fn from(e: validator::ValidationErrors) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: ServerError) -> StatusCode {
        e.into_response().status()
    }

    #[test]
    fn domain_errors_map_to_client_statuses() {
        assert_eq!(status_of(BatchError::EmptyCombinations.into()), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(BatchError::TooManyCombinations { limit: 1 }.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(BatchError::NotFound(3).into()), StatusCode::NOT_FOUND);
        assert_eq!(status_of(BatchError::AlreadyRunning(3).into()), StatusCode::CONFLICT);
    }

    #[test]
    fn store_errors_are_hidden() {
        let e: ServerError = BatchError::InvalidRecord {
            task_id: 1,
            reason: "unknown status 'x'".into(),
        }
        .into();
        assert_eq!(status_of(e), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
