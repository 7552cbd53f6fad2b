//! Record listing with `field__op=value` filters.

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use blockvault_core::error::AppError;
use blockvault_entity::{BackupRecord, QueueTask};

/// Arguments for list commands
#[derive(Debug, Args)]
pub struct ListArgs {
    /// What to list
    #[command(subcommand)]
    pub command: ListCommand,
}

/// List subcommands
#[derive(Debug, Subcommand)]
pub enum ListCommand {
    /// Queue tasks of the current cohort
    Tasks {
        /// Condition such as `status=wip` or `created_at__lt=2024-01-01T00:00:00Z`
        #[arg(short = 'w', long = "where")]
        conditions: Vec<String>,
    },
    /// Backup records
    Records {
        /// Condition such as `completed=false` or `volume_id=...`
        #[arg(short = 'w', long = "where")]
        conditions: Vec<String>,
    },
}

/// Queue task display row
#[derive(Debug, Serialize, Tabled)]
struct TaskRow {
    /// Task id
    id: String,
    /// Volume
    volume: String,
    /// Instance
    instance: String,
    /// Status
    status: String,
    /// Mode
    mode: &'static str,
    /// Provider backup id
    backup_id: String,
    /// Failure reason
    reason: String,
}

impl From<&QueueTask> for TaskRow {
    fn from(task: &QueueTask) -> Self {
        Self {
            id: task.id.to_string(),
            volume: format!("{} ({})", task.volume_name, task.volume_id),
            instance: task.instance_name.clone(),
            status: task.status.to_string(),
            mode: if task.incremental { "incremental" } else { "full" },
            backup_id: task.backup_id.clone().unwrap_or_default(),
            reason: task.reason.clone().unwrap_or_default(),
        }
    }
}

/// Backup record display row
#[derive(Debug, Serialize, Tabled)]
struct RecordRow {
    /// Provider backup id
    backup_id: String,
    /// Volume
    volume_id: String,
    /// Project
    project_id: String,
    /// Completion flag
    completed: bool,
    /// Mode
    mode: &'static str,
    /// Creation time
    created_at: String,
}

impl From<&BackupRecord> for RecordRow {
    fn from(record: &BackupRecord) -> Self {
        Self {
            backup_id: record.backup_id.clone(),
            volume_id: record.volume_id.clone(),
            project_id: record.project_id.clone(),
            completed: record.completed,
            mode: if record.incremental { "incremental" } else { "full" },
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

/// Execute list commands
pub async fn execute(args: &ListArgs, env: &str, format: OutputFormat) -> Result<(), AppError> {
    let config = super::load_config(env)?;

    match &args.command {
        ListCommand::Tasks { conditions } => {
            let filter = super::parse_filter(conditions)?;
            let store = super::open_store(&config).await?;
            let tasks = store.list_queue_tasks(&filter).await?;
            match format {
                OutputFormat::Json => output::print_json(&tasks),
                OutputFormat::Table => {
                    let rows: Vec<TaskRow> = tasks.iter().map(TaskRow::from).collect();
                    output::print_list(&rows, format);
                }
            }
        }
        ListCommand::Records { conditions } => {
            let filter = super::parse_filter(conditions)?;
            let store = super::open_store(&config).await?;
            let records = store.list_backup_records(&filter).await?;
            match format {
                OutputFormat::Json => output::print_json(&records),
                OutputFormat::Table => {
                    let rows: Vec<RecordRow> = records.iter().map(RecordRow::from).collect();
                    output::print_list(&rows, format);
                }
            }
        }
    }

    Ok(())
}
