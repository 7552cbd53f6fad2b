//! Configuration management CLI commands.

use clap::{Args, Subcommand};

use crate::output;
use blockvault_core::config::mask_password;
use blockvault_core::error::AppError;
use blockvault_core::types::RetentionPolicy;

/// Arguments for config commands
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration with secrets masked
    Show,
    /// Load the configuration and report what would run
    Validate,
}

/// Execute config commands
pub fn execute(args: &ConfigArgs, env: &str) -> Result<(), AppError> {
    let config = super::load_config(env)?;

    match &args.command {
        ConfigCommand::Show => {
            output::print_json(&config.redacted()?);
        }
        ConfigCommand::Validate => {
            output::print_success(&format!("Configuration for '{}' is valid", env));
            output::print_kv("Store", &format!("{:?}", config.store.provider));
            output::print_kv("Database", &mask_password(&config.database.url));
            output::print_kv("Cloud", &format!("{:?}", config.cloud.provider));
            output::print_kv("Projects", &config.cloud.projects.join(", "));
            output::print_kv(
                "Backup period",
                &format!("{}s", config.conductor.backup_period_seconds),
            );
            output::print_kv(
                "Retention period",
                &format!("{}s", config.conductor.retention_period_seconds),
            );
            // The retention policy is only checked here; the daemon skips
            // retention ticks while it is malformed.
            match config.conductor.retention_time.parse::<RetentionPolicy>() {
                Ok(policy) => output::print_kv("Retention", &policy.to_string()),
                Err(e) => output::print_warning(&format!("Retention policy invalid: {}", e)),
            }
        }
    }

    Ok(())
}
