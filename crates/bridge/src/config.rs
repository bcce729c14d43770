//! Process configuration: CLI flags with environment fallbacks, read once at startup.

use crate::engine::EngineConfig;
use crate::error::{BridgeError, Result};
use crate::manifest::DocumentSource;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use supabridge_rest_backend::BackendConfig;
use supabridge_rest_backend::config::parse_csv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Tool gateway and NDJSON streaming dispatcher over a PostgREST-style data API.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Listen address. Overrides `--port`.
    #[arg(long, env = "SUPABRIDGE_BIND")]
    pub bind: Option<SocketAddr>,

    /// Listen port on all interfaces.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Base URL of the data API (e.g. `https://xyz.supabase.co`).
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: String,

    /// API key sent as `apikey` and bearer token.
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    pub supabase_anon_key: Option<String>,

    /// Path between the base URL and the table name.
    #[arg(
        long,
        env = "SUPABRIDGE_RESOURCE_PATH",
        default_value = BackendConfig::DEFAULT_RESOURCE_PATH
    )]
    pub resource_path: String,

    /// Comma-separated CORS origins. Empty = any origin.
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = "")]
    pub allowed_origins: String,

    /// Comma-separated table allow-list. Empty = all tables.
    #[arg(long, env = "ALLOWED_TABLES", default_value = "")]
    pub allowed_tables: String,

    /// Enable `supabase_insert` (`1`, `true`, `yes`, `on`).
    #[arg(
        long,
        env = "ALLOW_WRITES",
        default_value = "false",
        value_parser = parse_flag,
        action = clap::ArgAction::Set
    )]
    pub allow_writes: bool,

    /// Plugin manifest file. Defaults to the built-in manifest.
    #[arg(long, env = "SUPABRIDGE_MANIFEST_PATH")]
    pub manifest_path: Option<PathBuf>,

    /// OpenAPI document file. Defaults to the generated document.
    #[arg(long, env = "SUPABRIDGE_OPENAPI_PATH")]
    pub openapi_path: Option<PathBuf>,

    /// Upstream request timeout in seconds (0 = none).
    #[arg(long, env = "SUPABRIDGE_UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    /// Maximum upstream response size in bytes (0 = unlimited).
    #[arg(long, env = "SUPABRIDGE_MAX_RESPONSE_BYTES", default_value_t = 0)]
    pub max_response_bytes: usize,

    /// Maximum concurrent streaming sessions (0 = unlimited).
    #[arg(long, env = "SUPABRIDGE_MAX_SESSIONS", default_value_t = 1024)]
    pub max_sessions: usize,

    /// Close a streaming session after this many seconds without input (0 = never).
    #[arg(long, env = "SUPABRIDGE_SESSION_IDLE_TIMEOUT_SECS", default_value_t = 300)]
    pub session_idle_timeout_secs: u64,

    /// Maximum length of one inbound NDJSON line.
    #[arg(long, env = "SUPABRIDGE_MAX_LINE_BYTES", default_value_t = 1024 * 1024)]
    pub max_line_bytes: usize,

    /// Default log filter; `RUST_LOG` takes precedence.
    #[arg(long, env = "SUPABRIDGE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "SUPABRIDGE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bind: SocketAddr,
    pub backend: BackendConfig,
    pub allowed_origins: Vec<String>,
    pub manifest: DocumentSource,
    pub openapi: DocumentSource,
    pub max_sessions: usize,
    pub engine: EngineConfig,
}

impl Cli {
    /// Validate and resolve into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] for an empty data API URL or a zero line limit.
    pub fn into_config(self) -> Result<BridgeConfig> {
        let base_url = self.supabase_url.trim().to_string();
        if base_url.is_empty() {
            return Err(BridgeError::Config("SUPABASE_URL must not be empty".to_string()));
        }
        if self.max_line_bytes == 0 {
            return Err(BridgeError::Config(
                "max line bytes must be greater than zero".to_string(),
            ));
        }

        let mut backend = BackendConfig::new(base_url);
        backend.api_key = self.supabase_anon_key.filter(|k| !k.is_empty());
        backend.resource_path = self.resource_path;
        backend.allowed_tables = parse_csv(&self.allowed_tables).into_iter().collect();
        backend.allow_writes = self.allow_writes;
        backend.timeout = secs(self.upstream_timeout_secs);
        backend.max_response_bytes =
            (self.max_response_bytes > 0).then_some(self.max_response_bytes);

        Ok(BridgeConfig {
            bind: self
                .bind
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], self.port))),
            backend,
            allowed_origins: parse_csv(&self.allowed_origins),
            manifest: DocumentSource::from_path(self.manifest_path),
            openapi: DocumentSource::from_path(self.openapi_path),
            max_sessions: self.max_sessions,
            engine: EngineConfig {
                idle_timeout: secs(self.session_idle_timeout_secs),
                max_line_bytes: self.max_line_bytes,
            },
        })
    }
}

fn secs(n: u64) -> Option<Duration> {
    (n > 0).then(|| Duration::from_secs(n))
}

fn parse_flag(raw: &str) -> std::result::Result<bool, String> {
    Ok(matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    ))
}
