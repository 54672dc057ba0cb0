//! draco replicator
//!
//! Serves the producer and consumer roles of the snapshot replication saga
//! and the completion poller over HTTP.

use std::sync::Arc;

use anyhow::{bail, Result};
use draco_replicator::{api, config, platform::LocalPlatform, state::AppState};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to DRACO_DEBUG / DRACO_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.filter_directive().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting draco replicator");
    info!(
        listen_addr = %config.listen_addr,
        role = ?config.role,
        dr_account = %config.dr_account,
        dry_run = config.dry_run,
        "Configuration loaded"
    );

    if !config.dev_mode {
        error!("No cloud platform is configured; only the local platform is available");
        bail!("set DRACO_DEV=1 to run against the local platform");
    }

    let config = Arc::new(config);
    let (platform, messages) = LocalPlatform::build(config.clone());
    info!(producer_account = %platform.producer_account, "Local platform ready");

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Deliver bus messages to the roles
    let dispatcher = platform.dispatcher.clone();
    let dispatcher_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            dispatcher.run(messages, shutdown_rx).await;
        }
    });

    let state = AppState::new(platform);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, dispatcher_handle).await {
        warn!(error = %e, "Dispatcher did not shut down in time");
    }

    info!("draco shutdown complete");
    Ok(())
}
