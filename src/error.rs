//! Error kinds shared identically by the Store, Scheduler, Session registry,
//! Coordinator service, and Client façade (spec §7).

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// The one error type every public operation in the coordination core
/// returns. Both client modes surface the same variants for the same
/// failures — see `ClientBackend`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store lock unavailable after {0:?}")]
    LockTimeout(std::time::Duration),

    #[error("coordinator unreachable: {0}")]
    Unavailable(String),

    #[error("stale session: {0}")]
    Stale(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// HTTP status code for this error kind, per spec §6/§7.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Stale(_) => StatusCode::CONFLICT,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable tag, used by the parallel-mode HTTP client to
    /// reconstruct the same `CoreError` variant from a JSON response body.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::InvalidArgument(_) => "invalid_argument",
            CoreError::Conflict(_) => "conflict",
            CoreError::LockTimeout(_) => "lock_timeout",
            CoreError::Unavailable(_) => "unavailable",
            CoreError::Stale(_) => "stale",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Reconstruct from the tag + message pair carried in an HTTP error body.
    pub fn from_tag(tag: &str, message: String) -> Self {
        match tag {
            "not_found" => CoreError::NotFound(message),
            "invalid_argument" => CoreError::InvalidArgument(message),
            "conflict" => CoreError::Conflict(message),
            "lock_timeout" => CoreError::LockTimeout(std::time::Duration::from_secs(0)),
            "stale" => CoreError::Stale(message),
            _ => CoreError::Internal(message),
        }
    }

    /// 4xx errors are never retried by the Client façade's backoff loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Unavailable(_) | CoreError::LockTimeout(_))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Internal(e.to_string())
    }
}

/// Lets Coordinator handlers `?`-propagate `CoreError` straight into an
/// axum response, matching the teacher's `{"error": ...}` JSON envelope.
impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind_tag(),
        }));
        (status, body).into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
