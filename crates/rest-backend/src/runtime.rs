//! Runtime for executing `supabase_select` / `supabase_insert` against the data API.

use crate::args::{InsertArgs, SelectArgs};
use crate::config::BackendConfig;
use crate::error::{BackendError, Result};
use crate::query::{select_query, table_url};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// Read/write operations the tool surfaces dispatch into.
#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Filtered read. Returns the parsed response body (possibly an empty array).
    async fn select(&self, args: SelectArgs) -> Result<Value>;

    /// Row insert. Returns the inserted rows or a minimal acknowledgement.
    async fn insert(&self, args: InsertArgs) -> Result<InsertOutcome>;
}

/// Successful insert result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertOutcome {
    /// Upstream status (`200`, `201` or `204`).
    pub status: u16,
    /// Inserted rows, or `{status, message}` when no representation came back.
    pub body: Value,
}

#[derive(Clone)]
pub struct RestBackend {
    inner: Arc<RestBackendInner>,
}

struct RestBackendInner {
    config: BackendConfig,
    client: Client,
}

impl RestBackend {
    /// Build a backend from static config. The instance is cheap to clone and safe to share.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self> {
        url::Url::parse(&config.base_url).map_err(|e| {
            BackendError::Config(format!("Invalid base URL '{}': {e}", config.base_url))
        })?;

        let mut builder = Client::builder();
        if let Some(t) = config.timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build().map_err(BackendError::from)?;

        Ok(Self {
            inner: Arc::new(RestBackendInner { config, client }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.inner.config
    }

    fn ensure_table_allowed(&self, table: &str) -> Result<()> {
        if self.inner.config.table_allowed(table) {
            Ok(())
        } else {
            Err(BackendError::TableNotAllowed {
                table: table.to_string(),
            })
        }
    }

    fn apply_auth(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(key) = &self.inner.config.api_key {
            request = request
                .header("apikey", key)
                .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"));
        }
        request
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<(StatusCode, Vec<u8>)> {
        let status = response.status();
        let bytes =
            read_response_body_limited_bytes(response, self.inner.config.max_response_bytes)
                .await?;
        if status.is_success() {
            Ok((status, bytes))
        } else {
            Err(BackendError::Upstream {
                status: status.as_u16(),
                body: bytes_to_json_or_text(&bytes),
            })
        }
    }
}

#[async_trait]
impl DataBackend for RestBackend {
    async fn select(&self, args: SelectArgs) -> Result<Value> {
        self.ensure_table_allowed(&args.table)?;

        let cfg = &self.inner.config;
        let query = select_query(&args);
        let url = table_url(&cfg.base_url, &cfg.resource_path, &args.table, Some(&query))?;
        debug!(table = %args.table, "select");

        let request = self.apply_auth(self.inner.client.get(url));
        let response = request.send().await?;
        let (_, bytes) = self.read_body(response).await?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Array(Vec::new()));
        }
        Ok(bytes_to_json_or_text(&bytes))
    }

    async fn insert(&self, args: InsertArgs) -> Result<InsertOutcome> {
        if !self.inner.config.allow_writes {
            return Err(BackendError::WritesDisabled);
        }
        self.ensure_table_allowed(&args.table)?;
        let rows = args.rows_array()?;

        let cfg = &self.inner.config;
        let url = table_url(&cfg.base_url, &cfg.resource_path, &args.table, None)?;
        let prefer = if args.return_representation {
            "return=representation"
        } else {
            "return=minimal"
        };
        debug!(table = %args.table, prefer, "insert");

        let request = self
            .apply_auth(self.inner.client.post(url))
            .header("Prefer", prefer)
            .json(&rows);
        let response = request.send().await?;
        let (status, bytes) = self.read_body(response).await?;

        let has_body = !bytes.iter().all(u8::is_ascii_whitespace);
        let body = if status != StatusCode::NO_CONTENT && has_body {
            bytes_to_json_or_text(&bytes)
        } else {
            json!({ "status": status.as_u16(), "message": "Insert successful" })
        };

        Ok(InsertOutcome {
            status: status.as_u16(),
            body,
        })
    }
}

async fn read_response_body_limited_bytes(
    mut response: reqwest::Response,
    max_bytes: Option<usize>,
) -> Result<Vec<u8>> {
    let Some(max) = max_bytes else {
        let bytes = response.bytes().await.map_err(BackendError::from)?;
        return Ok(bytes.to_vec());
    };

    if let Some(len) = response.content_length()
        && len > max as u64
    {
        return Err(BackendError::Transport(format!(
            "Response too large: {len} bytes (limit {max})"
        )));
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(BackendError::from)? {
        if out.len().saturating_add(chunk.len()) > max {
            return Err(BackendError::Transport(format!(
                "Response too large: exceeded {max} bytes"
            )));
        }
        out.extend_from_slice(&chunk);
    }

    Ok(out)
}

fn bytes_to_json_or_text(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
