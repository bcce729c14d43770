//! Error types for the REST backend.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// An allow-list is configured and the table is not on it.
    #[error("Table not allowed")]
    TableNotAllowed { table: String },

    /// Insert attempted while write mode is off.
    #[error("Inserts not allowed")]
    WritesDisabled,

    /// The data API answered with a non-2xx status.
    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: Value },

    /// Tool arguments could not be decoded.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Connect/timeout/IO failures talking to the data API.
    #[error("Upstream transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

impl From<reqwest::Error> for BackendError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(sanitize_reqwest_error(&value))
    }
}

/// Strip the request URL (which carries user filter values) from a reqwest error message.
#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

fn redact_url(u: &url::Url) -> String {
    let mut redacted = u.clone();
    let _ = redacted.set_password(None);
    let _ = redacted.set_username("");
    redacted.set_query(None);
    redacted.to_string()
}
