//! Tool catalog and dispatch.
//!
//! The tool set is closed: `supabase_select` (read) and `supabase_insert` (write). Both the
//! `/tools/*` endpoints and the `/mcp` stream go through [`invoke`].

use crate::error::{BridgeError, Result};
use serde_json::{Value, json};
use supabridge_rest_backend::{DataBackend, InsertArgs, SelectArgs};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Select,
    Insert,
}

/// Result of a tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// HTTP status to use on the request/response surface.
    pub status: u16,
    pub body: Value,
}

impl ToolKind {
    pub const ALL: [ToolKind; 2] = [ToolKind::Select, ToolKind::Insert];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Select => "supabase_select",
            Self::Insert => "supabase_insert",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    #[must_use]
    pub fn capability(self) -> Capability {
        match self {
            Self::Select => Capability::Read,
            Self::Insert => Capability::Write,
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Select => {
                "Read rows from a table with optional equality filters, limit and ordering."
            }
            Self::Insert => "Insert one or more rows into a table.",
        }
    }

    /// JSON Schema of the tool's `args` object.
    #[must_use]
    pub fn input_schema(self) -> Value {
        match self {
            Self::Select => json!({
                "type": "object",
                "required": ["table"],
                "properties": {
                    "table": { "type": "string" },
                    "select": { "type": "string", "default": "*" },
                    "match": {
                        "type": "object",
                        "additionalProperties": { "type": ["string", "number", "boolean"] }
                    },
                    "limit": { "type": "integer", "minimum": 1 },
                    "order": {
                        "type": "object",
                        "required": ["column"],
                        "properties": {
                            "column": { "type": "string" },
                            "ascending": { "type": "boolean", "default": false }
                        }
                    }
                }
            }),
            Self::Insert => json!({
                "type": "object",
                "required": ["table", "rows"],
                "properties": {
                    "table": { "type": "string" },
                    "rows": {
                        "oneOf": [
                            { "type": "array", "items": { "type": "object" } },
                            { "type": "object" }
                        ]
                    },
                    "returnRepresentation": { "type": "boolean", "default": false }
                }
            }),
        }
    }
}

/// Run `tool` with opaque `args` against `backend`.
///
/// # Errors
///
/// Propagates argument decoding and backend failures.
pub async fn invoke(backend: &dyn DataBackend, tool: ToolKind, args: Value) -> Result<ToolOutput> {
    debug!(tool = tool.name(), capability = ?tool.capability(), "invoking tool");
    match tool {
        ToolKind::Select => {
            let args = SelectArgs::from_value(args)?;
            let rows = backend.select(args).await?;
            Ok(ToolOutput {
                status: 200,
                body: rows,
            })
        }
        ToolKind::Insert => {
            let args = InsertArgs::from_value(args)?;
            let outcome = backend.insert(args).await?;
            Ok(ToolOutput {
                status: outcome.status,
                body: outcome.body,
            })
        }
    }
}

/// Resolve a tool by wire name and run it.
///
/// # Errors
///
/// [`BridgeError::UnknownTool`] for names outside the catalog; otherwise as [`invoke`].
pub async fn dispatch(backend: &dyn DataBackend, name: &str, args: Value) -> Result<Value> {
    let tool = ToolKind::from_name(name).ok_or_else(|| BridgeError::UnknownTool(name.to_string()))?;
    invoke(backend, tool, args).await.map(|out| out.body)
}


#[cfg(test)]
mod tests {
    use super::testing::FakeBackend;
    use super::*;

    #[test]
    fn catalog_round_trips_names_and_capabilities() {
        for tool in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(tool.name()), Some(tool));
        }
        assert_eq!(ToolKind::Select.capability(), Capability::Read);
        assert_eq!(ToolKind::Insert.capability(), Capability::Write);
        assert_eq!(ToolKind::from_name("supabase_delete"), None);
    }

    #[tokio::test]
    async fn dispatch_unknown_tool() {
        let backend = FakeBackend::default();
        let err = dispatch(&backend, "drop_table", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownTool(ref n) if n == "drop_table"));
        assert_eq!(err.to_string(), "Unknown tool");
        assert!(backend.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn dispatch_decodes_args_before_calling_backend() {
        let backend = FakeBackend::default();
        let err = dispatch(&backend, "supabase_select", json!({"limit": 3}))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(backend.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn invoke_insert_carries_upstream_status() {
        let backend = FakeBackend {
            allow_writes: true,
            ..FakeBackend::default()
        };
        let out = invoke(
            &backend,
            ToolKind::Insert,
            json!({"table": "notes", "rows": [{"a": 1}]}),
        )
        .await
        .expect("insert");
        assert_eq!(out.status, 201);
    }
}
