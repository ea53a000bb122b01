use std::env;
use std::path::Path;

use ha_ingest_core::{config, http, wiring};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config_path = env::var("HA_INGEST_CORE_CONFIG").unwrap_or_else(|_| "/etc/ha-ingest-core/config.toml".to_owned());
    let cfg = config::load_config_from_path(Path::new(&config_path))
        .unwrap_or_else(|e| panic!("failed to load config from '{config_path}': {e}"));

    info!(hub_url = %cfg.hub.url, "wiring up core pipeline");
    let core = wiring::wire_up(&cfg)?;

    let bind_addr = cfg.operator_http_bind.clone();
    let router = http::build_router(core.state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind operator HTTP surface on '{bind_addr}': {e}"));
    info!(addr = %bind_addr, "operator HTTP surface listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown signal received, draining pipeline");
    let _ = core.session_shutdown.send(());
    let _ = core.pipeline_shutdown.send(());
    for handle in core.handles {
        let _ = handle.await;
    }
    info!("core pipeline shut down gracefully");
    Ok(())
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
