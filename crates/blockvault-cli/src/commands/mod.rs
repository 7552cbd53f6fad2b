//! CLI command definitions and dispatch.

pub mod config;
pub mod list;
pub mod migrate;
pub mod quota;
pub mod status;
pub mod tick;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use blockvault_core::config::AppConfig;
use blockvault_core::error::AppError;
use blockvault_core::types::{Filter, FilterField};
use blockvault_database::RecordStore;

/// BlockVault - scheduled block-storage backups
#[derive(Debug, Parser)]
#[command(name = "blockvault", version, about, long_about = None)]
pub struct Cli {
    /// Configuration overlay to load from config/{env}.toml
    #[arg(short, long, default_value = "development", env = "BLOCKVAULT_ENV")]
    pub env: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show queue and backup record counts
    Status,
    /// Show the provider backup quota of a project
    Quota(quota::QuotaArgs),
    /// Run exactly one tick of an engine
    Tick(tick::TickArgs),
    /// List queue tasks or backup records
    List(list::ListArgs),
    /// Run database migrations
    Migrate,
    /// Configuration management
    Config(config::ConfigArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        match &self.command {
            Commands::Status => status::execute(&self.env, self.format).await,
            Commands::Quota(args) => quota::execute(args, &self.env, self.format).await,
            Commands::Tick(args) => tick::execute(args, &self.env).await,
            Commands::List(args) => list::execute(args, &self.env, self.format).await,
            Commands::Migrate => migrate::execute(&self.env).await,
            Commands::Config(args) => config::execute(args, &self.env),
        }
    }
}

/// Helper: load configuration for an environment
pub fn load_config(env: &str) -> Result<AppConfig, AppError> {
    AppConfig::load(env)
}

/// Helper: open the configured record store
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn RecordStore>, AppError> {
    blockvault_database::open_store(&config.store, &config.database).await
}

/// Helper: build a filter from `field__op=value` arguments
pub fn parse_filter<F: FilterField>(pairs: &[String]) -> Result<Filter<F>, AppError> {
    let split = pairs
        .iter()
        .map(|pair| {
            pair.split_once('=').ok_or_else(|| {
                AppError::validation(format!("Expected field__op=value, got '{}'", pair))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Filter::parse_pairs(split)
}
