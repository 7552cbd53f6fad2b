//! One-off engine ticks.

use clap::{Args, ValueEnum};

use crate::output;
use blockvault_core::error::AppError;
use blockvault_worker::{BackupEngine, BackupSettings, RetentionEngine, TickError};

/// Arguments for the tick command
#[derive(Debug, Args)]
pub struct TickArgs {
    /// Engine to tick
    #[arg(value_enum)]
    pub engine: EngineKind,
}

/// Engines that can be ticked by hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// Backup creation engine
    Backup,
    /// Retention engine
    Retention,
}

/// Execute the tick command
pub async fn execute(args: &TickArgs, env: &str) -> Result<(), AppError> {
    let config = super::load_config(env)?;
    let store = super::open_store(&config).await?;
    let cloud = blockvault_cloud::build_client(&config.cloud)?;

    let result = match args.engine {
        EngineKind::Backup => {
            let engine = BackupEngine::new(store, cloud, BackupSettings::from_config(&config));
            engine
                .run_once()
                .await
                .map(serde_json::to_value)
        }
        EngineKind::Retention => {
            let engine = RetentionEngine::from_config(store, cloud, &config);
            engine
                .run_once()
                .await
                .map(serde_json::to_value)
        }
    };

    match result {
        Ok(report) => {
            output::print_json(&report?);
            Ok(())
        }
        Err(TickError::Aborted(reason)) => {
            output::print_warning(&format!("Tick skipped: {}", reason));
            Ok(())
        }
        Err(TickError::Internal(e)) => Err(e),
    }
}
