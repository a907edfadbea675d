//! Error types for the HTTP API.
//!
//! [`ObserverError`] converts into an Axum response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use daws_core::CoordinatorError;

/// Errors returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The coordinator refused or failed the request.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ObserverError {
    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Coordinator(e) if e.is_rejection() => StatusCode::CONFLICT,
            Self::Coordinator(CoordinatorError::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Coordinator(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
