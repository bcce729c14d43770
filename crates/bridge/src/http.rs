//! HTTP surface: health, documents, request/response tools, and the `/mcp` stream.

use crate::engine::{EngineConfig, StreamEngine};
use crate::error::{BridgeError, Result};
use crate::manifest::{self, DocumentSource};
use crate::session::SessionRegistry;
use crate::tools::{self, ToolKind};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt as _;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use supabridge_rest_backend::{BackendError, DataBackend};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Instrument as _, debug, warn};

/// Session header accepted on `/mcp` requests and echoed on responses.
pub const HEADER_SESSION_ID: &str = "mcp-session-id";
const NDJSON_MIME_TYPE: &str = "application/x-ndjson";

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn DataBackend>,
    pub engine: StreamEngine,
    pub manifest: DocumentSource,
    pub openapi: DocumentSource,
}

impl AppState {
    #[must_use]
    pub fn new(
        backend: Arc<dyn DataBackend>,
        registry: Arc<SessionRegistry>,
        engine_config: EngineConfig,
    ) -> Self {
        let engine = StreamEngine::new(registry, backend.clone(), engine_config);
        Self {
            backend,
            engine,
            manifest: DocumentSource::Embedded,
            openapi: DocumentSource::Embedded,
        }
    }

    #[must_use]
    pub fn with_documents(mut self, manifest: DocumentSource, openapi: DocumentSource) -> Self {
        self.manifest = manifest;
        self.openapi = openapi;
        self
    }
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let mut tools_router: Router<AppState> = Router::new();
    for tool in ToolKind::ALL {
        let path = format!("/tools/{}", tool.name());
        tools_router = tools_router.route(
            &path,
            post(move |State(state): State<AppState>, body: Bytes| async move {
                run_tool(&state, tool, &body).await
            }),
        );
    }

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/.well-known/ai-plugin.json", get(plugin_manifest))
        .route("/openapi.json", get(openapi))
        .route("/mcp", post(mcp_open).delete(mcp_close))
        .merge(tools_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let session_header = HeaderName::from_static(HEADER_SESSION_ID);
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, session_header.clone()])
        .expose_headers([session_header]);

    if allowed_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(parse_origins(allowed_origins))
    }
}

fn parse_origins(allowed_origins: &[String]) -> Vec<HeaderValue> {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o.escape_debug(), "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        warn!("no valid CORS origins configured; cross-origin requests will be refused");
    }
    origins
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn run_tool(state: &AppState, tool: ToolKind, body: &[u8]) -> Result<Response> {
    let args = parse_json_body(body)?;
    let out = tools::invoke(state.backend.as_ref(), tool, args).await?;
    let status = StatusCode::from_u16(out.status).unwrap_or(StatusCode::OK);
    Ok((status, Json(out.body)).into_response())
}

fn parse_json_body(body: &[u8]) -> Result<Value> {
    if body.trim_ascii().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| {
        BridgeError::Backend(BackendError::InvalidArguments(format!(
            "request body is not JSON: {e}"
        )))
    })
}

async fn plugin_manifest(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>> {
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let doc = manifest::load_plugin_manifest(&state.manifest, host).await?;
    Ok(Json(doc))
}

async fn openapi(State(state): State<AppState>) -> Json<Value> {
    Json(manifest::load_openapi(&state.openapi).await)
}

fn requested_session_id(headers: &HeaderMap) -> Result<Option<&str>> {
    let Some(raw) = headers.get(HEADER_SESSION_ID) else {
        return Ok(None);
    };
    let id = raw.to_str().map_err(|_| BridgeError::UnknownSession)?.trim();
    Ok((!id.is_empty()).then_some(id))
}

async fn mcp_open(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let requested = requested_session_id(&headers)?;
    let (conn, outbound) = state.engine.open(requested)?;

    let session_header = match HeaderValue::from_str(&conn.lease.id) {
        Ok(v) => v,
        Err(_) => {
            state.engine.registry().release(&conn.lease);
            return Err(BridgeError::UnknownSession);
        }
    };

    let inbound = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));
    let engine = state.engine.clone();
    let span = tracing::Span::current();
    tokio::spawn(
        async move {
            let reason = engine.run(conn, inbound).await;
            debug!(?reason, "stream task finished");
        }
        .instrument(span),
    );

    let body = Body::from_stream(
        ReceiverStream::new(outbound).map(|msg| Ok::<_, Infallible>(msg.to_line())),
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(NDJSON_MIME_TYPE)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (HeaderName::from_static(HEADER_SESSION_ID), session_header),
        ],
        body,
    )
        .into_response())
}

async fn mcp_close(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let Some(id) = requested_session_id(&headers)? else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing Mcp-Session-Id header" })),
        )
            .into_response());
    };
    if state.engine.registry().remove(id) {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": BridgeError::UnknownSession.to_string() })),
        )
            .into_response())
    }
}
