//! Archiver - streaming harvest-then-purge for live tables
//!
//! Usage:
//!   # Dry run: harvest rows matching the filter, delete nothing
//!   archiver --source mysql://user:pass@db:3306/shop -T orders -W "created_at < '2024-01-01'"
//!
//!   # Harvest and purge, 500 rows per batch, give up after an hour
//!   archiver --source mysql://user:pass@db:3306/shop -T orders --limit 500 --purge --timeout 3600
//!
//!   # From a config file
//!   archiver --config archiver.yaml --purge

mod cli;

use anyhow::Context;
use archiver::pipeline::Pipeline;
use archiver::registry;
use archiver::session::Session;
use clap::Parser;
use cli::Cli;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(2);
        }
    };

    registry::register_builtin_modules();

    let shutdown = CancellationToken::new();
    let session = Session::with_cancellation(config.batch_limit, shutdown.clone());
    if let Some(secs) = config.timeout_secs {
        session.cancel_after(Duration::from_secs(secs));
    }

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received, cancelling session");
        shutdown.cancel();
    });

    info!(
        session = %session.id,
        backend = %config.backend,
        source = %config.source_connection().redacted_url(),
        table = %config.table,
        batch_limit = config.batch_limit,
        purge = config.purge,
        "Starting archiver"
    );

    let mut pipeline = match Pipeline::from_registry(&config.backend, config.purge) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(session = %session.id, backend = %config.backend, error = %e, "Failed to resolve modules");
            return Err(e).context("archiving session failed");
        }
    };
    let report = match pipeline.run(&session, &config).await {
        Ok(report) => report,
        Err(e) => {
            error!(session = %session.id, error = %e, "Session failed");
            return Err(e).context("archiving session failed");
        }
    };

    if let Some(purge) = &report.purge {
        for failed in &purge.failed {
            warn!(
                session = %session.id,
                key = %failed.key,
                retriable = failed.retriable,
                error = %failed.error,
                "Delete failed"
            );
        }
    }

    if !report.is_success() {
        error!(
            session = %session.id,
            fetch_error = ?report.harvest_error.as_ref().map(ToString::to_string),
            failed_deletes = report.purge.as_ref().map_or(0, |p| p.failed.len()),
            "Archiving finished with errors"
        );
        std::process::exit(1);
    }

    info!(session = %session.id, "Goodbye!");
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
