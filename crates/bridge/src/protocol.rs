//! Wire messages of the `/mcp` stream.
//!
//! Inbound: one tool call per line, `{"id": ..., "name": "...", "args": {...}}`.
//! Outbound: one message per line, either a stream event (`ready`, `error`) or a result/error
//! correlated to the call's `id`.

use crate::error::BridgeError;
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

/// A decoded inbound tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: Value,
    pub name: String,
    pub args: Value,
}

/// Why an inbound line did not yield a [`ToolCall`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallParseError {
    /// Not JSON at all. Answered with an uncorrelated error event.
    InvalidJson,
    /// JSON, but missing `id` or `name`. Carries whatever `id` was present.
    InvalidMessage { id: Option<Value> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Ready {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Event(StreamEvent),
    Result {
        id: Value,
        result: Value,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        error: String,
    },
}

impl OutboundMessage {
    #[must_use]
    pub fn ready(session_id: impl Into<String>) -> Self {
        Self::Event(StreamEvent::Ready {
            session_id: session_id.into(),
        })
    }

    /// Uncorrelated framing error.
    #[must_use]
    pub fn stream_error(err: &BridgeError) -> Self {
        Self::Event(StreamEvent::Error {
            message: err.to_string(),
        })
    }

    #[must_use]
    pub fn call_error(id: Option<Value>, err: &BridgeError) -> Self {
        Self::Error {
            id,
            error: err.to_string(),
        }
    }

    /// Serialize as one NDJSON line (including the trailing `\n`).
    #[must_use]
    pub fn to_line(&self) -> Bytes {
        let mut buf = serde_json::to_vec(self).unwrap_or_else(|_| {
            br#"{"event":"error","message":"Internal serialization error"}"#.to_vec()
        });
        buf.push(b'\n');
        Bytes::from(buf)
    }
}

/// Decode one framed line into a tool call.
///
/// # Errors
///
/// See [`CallParseError`].
pub fn parse_call(line: &[u8]) -> Result<ToolCall, CallParseError> {
    let value: Value = serde_json::from_slice(line).map_err(|_| CallParseError::InvalidJson)?;
    let Value::Object(mut obj) = value else {
        return Err(CallParseError::InvalidMessage { id: None });
    };

    let id = obj.remove("id").filter(is_usable_id);
    let name = match obj.get("name") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };
    let (Some(id), Some(name)) = (id.clone(), name) else {
        return Err(CallParseError::InvalidMessage { id });
    };

    let args = match obj.remove("args") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(args) => args,
    };

    Ok(ToolCall { id, name, args })
}

fn is_usable_id(id: &Value) -> bool {
    match id {
        Value::String(s) => !s.is_empty(),
        Value::Number(_) => true,
        _ => false,
    }
}
