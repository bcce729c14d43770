//! Error types for the bridge.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use supabridge_rest_backend::BackendError;
use thiserror::Error;
use tracing::warn;

/// Main error type for the bridge.
///
/// `Display` strings are client-visible: they are sent verbatim in HTTP error bodies and in
/// in-band stream messages.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Tool-level failures from the data API client.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// An inbound stream line is not JSON.
    #[error("Invalid JSON")]
    InvalidJson,

    /// An inbound stream line exceeded the configured maximum length.
    #[error("Line too long")]
    LineTooLong,

    /// Valid JSON, but `id` or `name` is missing.
    #[error("Invalid message format")]
    InvalidMessage,

    #[error("Unknown tool")]
    UnknownTool(String),

    /// A caller asked to resume a session that is not live.
    #[error("Unknown session")]
    UnknownSession,

    #[error("Session limit reached")]
    SessionLimitReached,

    /// The plugin manifest could not be read or parsed.
    #[error("Failed to load plugin manifest")]
    Manifest(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Backend(BackendError::TableNotAllowed { .. } | BackendError::WritesDisabled) => {
                StatusCode::FORBIDDEN
            }
            Self::Backend(BackendError::InvalidArguments(_))
            | Self::InvalidJson
            | Self::LineTooLong
            | Self::InvalidMessage
            | Self::UnknownSession => StatusCode::BAD_REQUEST,
            Self::UnknownTool(_) => StatusCode::NOT_FOUND,
            Self::SessionLimitReached => StatusCode::SERVICE_UNAVAILABLE,
            Self::Backend(_) | Self::Manifest(_) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = ?self, "request failed");
        }

        let body = match &self {
            Self::Backend(BackendError::Upstream {
                status: upstream_status,
                body: upstream_body,
            }) => json!({
                "error": self.to_string(),
                "upstreamStatus": upstream_status,
                "upstreamBody": upstream_body,
            }),
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
