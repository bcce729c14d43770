//! Plugin manifest and OpenAPI documents.

use crate::error::{BridgeError, Result};
use crate::tools::{Capability, ToolKind};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use tracing::warn;

const EMBEDDED_PLUGIN_MANIFEST: &str = include_str!("../assets/ai-plugin.json");
const HOST_PLACEHOLDER: &str = "{{HOST}}";

/// Where a served document comes from.
#[derive(Debug, Clone, Default)]
pub enum DocumentSource {
    /// Built into the binary.
    #[default]
    Embedded,
    File(PathBuf),
}

impl DocumentSource {
    #[must_use]
    pub fn from_path(path: Option<PathBuf>) -> Self {
        path.map_or(Self::Embedded, Self::File)
    }
}

/// Load the plugin manifest, pointing `api.url` at this host's `/openapi.json` when it carries
/// the `{{HOST}}` placeholder.
///
/// # Errors
///
/// [`BridgeError::Manifest`] if the document cannot be read or is not JSON.
pub async fn load_plugin_manifest(source: &DocumentSource, host: Option<&str>) -> Result<Value> {
    let raw = match source {
        DocumentSource::Embedded => EMBEDDED_PLUGIN_MANIFEST.to_string(),
        DocumentSource::File(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BridgeError::Manifest(format!("read {}: {e}", path.display())))?,
    };
    let mut manifest: Value = serde_json::from_str(&raw)
        .map_err(|e| BridgeError::Manifest(format!("parse manifest: {e}")))?;

    if let Some(host) = host
        && let Some(url) = manifest.pointer_mut("/api/url")
        && url.as_str().is_some_and(|u| u.contains(HOST_PLACEHOLDER))
    {
        *url = Value::String(format!("https://{host}/openapi.json"));
    }

    Ok(manifest)
}

/// Load the OpenAPI document. Falls back to the generated one when no file is configured or
/// the file is unusable.
pub async fn load_openapi(source: &DocumentSource) -> Value {
    let DocumentSource::File(path) = source else {
        return openapi_document();
    };
    match read_json(path).await {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "falling back to built-in OpenAPI document");
            openapi_document()
        }
    }
}

async fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// OpenAPI 3 description of the `/tools/*` endpoints, generated from the tool catalog.
#[must_use]
pub fn openapi_document() -> Value {
    let mut paths = Map::new();
    for tool in ToolKind::ALL {
        let capability = match tool.capability() {
            Capability::Read => "read",
            Capability::Write => "write",
        };
        paths.insert(
            format!("/tools/{}", tool.name()),
            json!({
                "post": {
                    "operationId": tool.name(),
                    "summary": tool.description(),
                    "x-capability": capability,
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": { "schema": tool.input_schema() } }
                    },
                    "responses": {
                        "200": { "description": "Rows or acknowledgement" },
                        "403": { "$ref": "#/components/responses/Error" },
                        "500": { "$ref": "#/components/responses/Error" }
                    }
                }
            }),
        );
    }

    json!({
        "openapi": "3.0.1",
        "info": {
            "title": "Supabase Bridge",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Read and insert rows in allow-listed tables."
        },
        "paths": paths,
        "components": {
            "responses": {
                "Error": {
                    "description": "Error",
                    "content": {
                        "application/json": {
                            "schema": {
                                "type": "object",
                                "required": ["error"],
                                "properties": { "error": { "type": "string" } }
                            }
                        }
                    }
                }
            }
        }
    })
}
