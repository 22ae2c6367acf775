//! Logsink Server - HTTP front end for the durable event pipeline

mod api;
mod config;
mod logging;

use anyhow::Context;
use config::ServerConfig;
use logsink_core::pipeline::Pipeline;
use logsink_core::store::PgEventStore;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;
    logging::init_logging(config.log_format)?;

    info!("Starting Logsink server v{}...", logsink_core::VERSION);
    info!("Journal: {:?}", config.pipeline.journal.path);
    info!(
        "Store: postgres://{}@{}:{}/{}",
        config.database.user, config.database.host, config.database.port, config.database.database
    );

    let store = PgEventStore::connect(&config.database)
        .await
        .context("failed to connect to the store")?;
    store
        .migrate()
        .await
        .context("failed to apply store migrations")?;
    let store = Arc::new(store);

    let pipeline = Arc::new(
        Pipeline::start(config.pipeline.clone(), store.clone())
            .context("failed to start the ingestion pipeline")?,
    );

    let app = api::create_router(pipeline.clone());
    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    info!("Logsink server listening on http://{}", config.http_addr);

    // Stop accepting requests on the first signal. Open connections get one
    // grace period and the pipeline shutdown another, so the process exits
    // at most two grace periods after the signal.
    let stopping = Arc::new(Notify::new());
    let signalled = stopping.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        signalled.notify_one();
    });

    let grace = config.pipeline.shutdown_grace;
    tokio::select! {
        result = server => result.context("HTTP server failed")?,
        _ = async {
            stopping.notified().await;
            tokio::time::sleep(grace).await;
        } => warn!("Open connections did not finish within {:?}, closing them", grace),
    }

    info!("HTTP server stopped, shutting down pipeline");
    let result = pipeline.shutdown().await;
    store.close().await;

    match result {
        Ok(report) => {
            info!(
                "Logsink server stopped ({} records committed on shutdown)",
                report.committed
            );
            Ok(())
        }
        Err(e) => {
            error!("Logsink server stopped with unflushed journal data: {}", e);
            Err(e.into())
        }
    }
}

/// Resolve on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
