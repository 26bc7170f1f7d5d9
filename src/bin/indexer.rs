use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transfer_sync::config::Config;
use transfer_sync::engine::{PollingControl, SyncEngine};
use transfer_sync::repository::Database;
use transfer_sync::rpc::{RetryPolicy, RpcClient};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting lottery transfer sync");

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!(
        mode = %config.mode,
        token = %config.token_address,
        recipient = %config.recipient_address,
        "Watching {} transfers",
        config.token_symbol
    );
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.backup_rpc_urls.len() + 1
    );

    let retry = RetryPolicy::new(config.sync.max_retries, config.sync.retry_delay);
    let client = RpcClient::new(
        &config.rpc_url,
        &config.backup_rpc_urls,
        retry,
        config.primary_recheck,
    )
    .context("Failed to configure RPC client")?;
    info!(rpc = %client.current_url(), "RPC client connected");

    let db = Database::new(&config.database_url).context("Failed to open database")?;
    info!("Database initialized");

    let mut engine = SyncEngine::from_config(Arc::new(client), db, &config);

    if let Err(e) = engine.backfill().await {
        error!("Historical sync error: {}", e);
        return Err(e.into());
    }

    tokio::spawn(shutdown_signal(engine.control()));

    engine.poll().await?;
    info!("Shutdown complete");
    Ok(())
}

/// Stops polling on Ctrl-C or SIGTERM.
async fn shutdown_signal(control: PollingControl) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    control.stop();
}
