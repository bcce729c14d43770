use anyhow::Context as _;
use clap::Parser as _;
use std::sync::Arc;
use supabridge::config::Cli;
use supabridge::session::SessionRegistry;
use supabridge::{build_app, telemetry};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level, cli.log_format);

    let config = cli.into_config().context("invalid configuration")?;
    info!(
        bind = %config.bind,
        upstream = %config.backend.base_url,
        allowed_tables = config.backend.allowed_tables.len(),
        allow_writes = config.backend.allow_writes,
        "starting supabridge"
    );

    let app = build_app(&config).context("build application")?;
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal(app.registry))
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C / SIGTERM, after cancelling live streams so connections can drain.
async fn shutdown_signal(registry: Arc<SessionRegistry>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(live_sessions = registry.len(), "shutdown requested");
    registry.shutdown();
}
