//! Provider-side quota lookup.

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use blockvault_core::error::AppError;

/// Arguments for the quota command
#[derive(Debug, Args)]
pub struct QuotaArgs {
    /// Project to inspect; defaults to every configured project
    #[arg(short, long)]
    pub project: Option<String>,
}

/// Quota display row
#[derive(Debug, Serialize, Tabled)]
struct QuotaRow {
    /// Project id
    project: String,
    /// Backups held
    used: i64,
    /// Backups allowed
    limit: String,
    /// Whether the quota is used up
    exhausted: bool,
}

/// Execute the quota command
pub async fn execute(args: &QuotaArgs, env: &str, format: OutputFormat) -> Result<(), AppError> {
    let config = super::load_config(env)?;
    let cloud = blockvault_cloud::build_client(&config.cloud)?;

    let projects = match &args.project {
        Some(project) => vec![project.clone()],
        None => config.cloud.projects.clone(),
    };
    if projects.is_empty() {
        return Err(AppError::validation(
            "No project given and cloud.projects is empty",
        ));
    }

    let mut rows = Vec::with_capacity(projects.len());
    for project in projects {
        let quota = cloud.get_backup_quota(&project).await?;
        rows.push(QuotaRow {
            project,
            used: quota.used,
            limit: if quota.limit < 0 {
                "unlimited".to_string()
            } else {
                quota.limit.to_string()
            },
            exhausted: quota.is_exhausted(),
        });
    }

    output::print_list(&rows, format);
    Ok(())
}
