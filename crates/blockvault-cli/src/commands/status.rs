//! Queue and backup record overview.

use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use blockvault_core::error::AppError;
use blockvault_core::types::Filter;
use blockvault_entity::{BackupRecordField, QueueTaskField, QueueTaskStatus};
use blockvault_worker::QuotaGate;

/// One row of the status table
#[derive(Debug, Serialize, Tabled)]
struct CountRow {
    /// What is counted
    kind: String,
    /// Number held
    count: u64,
}

/// Execute the status command
pub async fn execute(env: &str, format: OutputFormat) -> Result<(), AppError> {
    let config = super::load_config(env)?;
    let store = super::open_store(&config).await?;

    let mut rows = Vec::new();
    for status in [
        QueueTaskStatus::Planned,
        QueueTaskStatus::Wip,
        QueueTaskStatus::Completed,
        QueueTaskStatus::Failed,
    ] {
        let filter = Filter::all().eq(QueueTaskField::Status, status.as_str());
        let count = store.list_queue_tasks(&filter).await?.len() as u64;
        rows.push(CountRow {
            kind: format!("tasks {}", status),
            count,
        });
    }
    for (label, completed) in [("backups completed", true), ("backups in progress", false)] {
        let filter = Filter::all().eq(BackupRecordField::Completed, completed);
        rows.push(CountRow {
            kind: label.to_string(),
            count: store.count_backup_records(&filter).await?,
        });
    }

    let usage = QuotaGate::new(store, config.conductor.max_backup_count)
        .usage()
        .await?;

    match format {
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "counts": rows,
            "quota": usage,
            "over_quota": usage.is_over_limit(),
        })),
        OutputFormat::Table => {
            output::print_list(&rows, format);
            output::print_kv("Backup records", &usage.count.to_string());
            output::print_kv("Max backup count", &usage.max.to_string());
            if usage.is_over_limit() {
                output::print_warning("Over quota: no new backups will be started");
            }
        }
    }
    Ok(())
}
