//! livebus server binary
//!
//! Loads configuration, binds the RTMP, media-HTTP, and health listeners,
//! and runs until SIGINT.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use livebus::http::{health_router, media_router, AppState};
use livebus::{Config, Registry, RtmpServer};

#[derive(Parser, Debug)]
#[command(name = "livebus")]
#[command(about = "Live-media ingest and fanout: RTMP in, HTTP-FLV / WebSocket-FLV out")]
#[command(version)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path).context("load configuration")?,
        None => Config::default(),
    };
    config.validate().context("validate configuration")?;

    let registry = Arc::new(Registry::new());

    let rtmp_listener = TcpListener::bind(("0.0.0.0", config.server.rtmp_port))
        .await
        .with_context(|| format!("bind RTMP port {}", config.server.rtmp_port))?;
    let http_listener = TcpListener::bind(("0.0.0.0", config.server.http_port))
        .await
        .with_context(|| format!("bind HTTP port {}", config.server.http_port))?;
    let health_listener = TcpListener::bind(("0.0.0.0", config.server.health_port))
        .await
        .with_context(|| format!("bind health port {}", config.server.health_port))?;

    info!(
        rtmp = config.server.rtmp_port,
        http = config.server.http_port,
        health = config.server.health_port,
        "livebus starting"
    );

    let (shutdown_tx, _) = tokio::sync::watch::channel(false);

    let rtmp = {
        let registry = Arc::clone(&registry);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let server = RtmpServer::new(registry);
            let shutdown = async {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = server.run_until(rtmp_listener, shutdown).await {
                tracing::error!(error = %e, "RTMP server error");
            }
        })
    };

    let media = {
        let router = media_router(AppState::new(Arc::clone(&registry)));
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(http_listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "HTTP server error");
            }
        })
    };

    let health = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(health_listener, health_router())
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "health server error");
            }
        })
    };

    tokio::signal::ctrl_c().await.context("wait for SIGINT")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for task in [rtmp, media, health] {
        let _ = task.await;
    }

    info!("server shut down cleanly");
    Ok(())
}
