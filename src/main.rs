//! BlockVault conductor daemon.
//!
//! Wires configuration, logging, the record store and the cloud client
//! into the backup and retention engines, then ticks both until a
//! shutdown signal arrives.

use std::sync::Arc;

use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use blockvault_core::config::AppConfig;
use blockvault_core::error::AppError;
use blockvault_worker::{BackupEngine, BackupSettings, Conductor, RetentionEngine};

#[tokio::main]
async fn main() {
    let env = std::env::var("BLOCKVAULT_ENV").unwrap_or_else(|_| "development".to_string());

    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!("Loaded configuration (env: {})", env);

    if let Err(e) = run(config).await {
        tracing::error!("Conductor error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main conductor run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting BlockVault v{}", env!("CARGO_PKG_VERSION"));

    let store = blockvault_database::open_store(&config.store, &config.database).await?;
    let cloud = blockvault_cloud::build_client(&config.cloud)?;

    let backup = BackupEngine::new(
        Arc::clone(&store),
        Arc::clone(&cloud),
        BackupSettings::from_config(&config),
    );
    let retention = RetentionEngine::from_config(store, cloud, &config);

    let mut conductor = Conductor::new();
    conductor.spawn(Arc::new(backup), config.conductor.backup_period());
    conductor.spawn(Arc::new(retention), config.conductor.retention_period());
    tracing::info!(
        "Engines started: backup every {}s, retention every {}s",
        config.conductor.backup_period_seconds,
        config.conductor.retention_period_seconds
    );

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, waiting for running ticks...");

    if conductor.shutdown(config.conductor.shutdown_grace()).await {
        tracing::info!("BlockVault stopped");
    } else {
        tracing::warn!(
            "Grace period of {}s elapsed, running ticks were aborted",
            config.conductor.shutdown_grace_seconds
        );
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
}
