//! Tool gateway over a PostgREST-style data API.
//!
//! Two tools (`supabase_select`, `supabase_insert`) are exposed as plain request/response
//! endpoints and over `/mcp`, a long-lived NDJSON stream that dispatches tool calls in order.

pub mod config;
pub mod engine;
pub mod error;
pub mod framing;
pub mod http;
pub mod manifest;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod tools;

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::session::SessionRegistry;
use axum::Router;
use std::sync::Arc;
use supabridge_rest_backend::RestBackend;

/// A fully wired application.
pub struct App {
    pub router: Router,
    /// Kept so the caller can cancel live streams on shutdown.
    pub registry: Arc<SessionRegistry>,
}

/// Build the backend client, session registry and router from resolved config.
///
/// # Errors
///
/// Returns an error if the data API client cannot be constructed.
pub fn build_app(config: &BridgeConfig) -> Result<App> {
    let backend = Arc::new(RestBackend::new(config.backend.clone())?);
    let registry = Arc::new(SessionRegistry::new(config.max_sessions));
    let state = http::AppState::new(backend, registry.clone(), config.engine.clone())
        .with_documents(config.manifest.clone(), config.openapi.clone());
    let router = http::router(state, &config.allowed_origins);
    Ok(App { router, registry })
}
