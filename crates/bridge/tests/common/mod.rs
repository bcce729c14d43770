#![allow(dead_code)]

use anyhow::Context as _;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use clap::Parser as _;
use futures::StreamExt as _;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::Duration;
use supabridge::config::Cli;

pub use supabridge_test_support::{KillOnDrop, TestServer, pick_unused_port, wait_http_ok};

/// One request seen by the mock data API.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub table: String,
    pub query: String,
    pub prefer: Option<String>,
    pub body: Value,
}

#[derive(Clone, Default)]
pub struct MockUpstream {
    pub requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockUpstream {
    /// PostgREST-like mock: `broken` answers 400, reads echo the query, inserts honour `Prefer`.
    pub async fn spawn() -> anyhow::Result<(Self, TestServer)> {
        let mock = Self::default();
        let app = Router::new()
            .route("/rest/v1/{table}", get(mock_select).post(mock_insert))
            .with_state(mock.clone());
        let server = TestServer::spawn(app).await?;
        Ok((mock, server))
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    fn record(&self, method: &str, table: &str, uri: &Uri, headers: &HeaderMap, body: &[u8]) {
        self.requests.lock().push(Recorded {
            method: method.to_string(),
            table: table.to_string(),
            query: uri.query().unwrap_or("").to_string(),
            prefer: headers
                .get("prefer")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: serde_json::from_slice(body).unwrap_or(Value::Null),
        });
    }
}

async fn mock_select(
    State(mock): State<MockUpstream>,
    Path(table): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    mock.record("GET", &table, &uri, &headers, b"");
    if table == "broken" {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({ "message": "column does not exist" })),
        )
            .into_response();
    }
    axum::Json(json!([{ "table": table, "query": uri.query().unwrap_or("") }])).into_response()
}

async fn mock_insert(
    State(mock): State<MockUpstream>,
    Path(table): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    mock.record("POST", &table, &uri, &headers, &body);
    let wants_rows = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|p| p.contains("return=representation"));
    if wants_rows {
        let rows: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (StatusCode::CREATED, axum::Json(rows)).into_response()
    } else {
        StatusCode::CREATED.into_response()
    }
}

/// Start the bridge router in-process against `upstream_base`.
pub async fn start_bridge(upstream_base: &str, extra_args: &[&str]) -> anyhow::Result<TestServer> {
    let mut argv = vec!["supabridge", "--supabase-url", upstream_base];
    argv.extend_from_slice(extra_args);
    let config = Cli::try_parse_from(argv)
        .context("parse bridge args")?
        .into_config()?;
    let app = supabridge::build_app(&config)?;
    TestServer::spawn(app.router).await
}

pub fn spawn_bridge_binary(upstream_base: &str, port: u16) -> anyhow::Result<Child> {
    let bin = env!("CARGO_BIN_EXE_supabridge");
    Command::new(bin)
        .env("SUPABASE_URL", upstream_base)
        .env("ALLOWED_TABLES", "notes")
        .arg("--bind")
        .arg(format!("127.0.0.1:{port}"))
        .arg("--log-level")
        .arg("info")
        .spawn()
        .context("spawn supabridge")
}

/// Incremental NDJSON reader over a streaming response body.
pub struct NdjsonLines {
    stream: futures::stream::BoxStream<'static, reqwest::Result<Bytes>>,
    buf: Vec<u8>,
}

impl NdjsonLines {
    pub fn new(resp: reqwest::Response) -> Self {
        Self {
            stream: resp.bytes_stream().boxed(),
            buf: Vec::new(),
        }
    }

    /// Next JSON line, or `None` once the stream has ended.
    pub async fn next(&mut self, timeout_dur: Duration) -> anyhow::Result<Option<Value>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                let value = serde_json::from_slice(&line[..pos]).context("outbound line json")?;
                return Ok(Some(value));
            }
            let chunk = tokio::time::timeout(timeout_dur, self.stream.next())
                .await
                .context("timed out waiting for stream data")?;
            match chunk {
                Some(chunk) => self.buf.extend_from_slice(&chunk.context("read chunk")?),
                None => {
                    anyhow::ensure!(self.buf.is_empty(), "stream ended mid-line");
                    return Ok(None);
                }
            }
        }
    }
}
