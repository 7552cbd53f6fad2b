//! Conductor (orchestration engine) configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Settings for the backup-creation and retention engines.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConductorConfig {
    /// Spacing in seconds between backup engine ticks.
    #[serde(default = "default_backup_period")]
    #[validate(range(min = 1))]
    pub backup_period_seconds: u64,
    /// Spacing in seconds between retention engine ticks.
    #[serde(default = "default_retention_period")]
    #[validate(range(min = 1))]
    pub retention_period_seconds: u64,
    /// Maximum number of backup records before new backups are gated.
    #[serde(default = "default_max_backup_count")]
    #[validate(range(min = 1))]
    pub max_backup_count: u64,
    /// Retention policy in `<N>y<N>m<N>w<N>d` form.
    ///
    /// Not validated at load time: a malformed policy only skips
    /// retention ticks.
    #[serde(default = "default_retention_time")]
    pub retention_time: String,
    /// Server metadata key whose value overrides `retention_time` for
    /// the backups of that server.
    #[serde(default)]
    pub retention_metadata_key: Option<String>,
    /// Skip volumes backed up within this many seconds (0 disables).
    #[serde(default)]
    pub backup_min_interval_seconds: u64,
    /// Number of recent backups inspected for a full backup before an
    /// incremental one is requested (0 means always full).
    #[serde(default = "default_full_backup_depth")]
    pub full_backup_depth: u32,
    /// Delete a cohort's tasks once all of them are terminal.
    #[serde(default = "default_true")]
    pub purge_drained_cohorts: bool,
    /// Time in seconds in-flight ticks are given to finish on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl ConductorConfig {
    /// Backup engine spacing.
    pub fn backup_period(&self) -> Duration {
        Duration::from_secs(self.backup_period_seconds)
    }

    /// Retention engine spacing.
    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention_period_seconds)
    }

    /// Shutdown drain period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            backup_period_seconds: default_backup_period(),
            retention_period_seconds: default_retention_period(),
            max_backup_count: default_max_backup_count(),
            retention_time: default_retention_time(),
            retention_metadata_key: None,
            backup_min_interval_seconds: 0,
            full_backup_depth: default_full_backup_depth(),
            purge_drained_cohorts: true,
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_backup_period() -> u64 {
    1800
}

fn default_retention_period() -> u64 {
    1200
}

fn default_max_backup_count() -> u64 {
    10
}

fn default_retention_time() -> String {
    "2w3d".to_string()
}

fn default_full_backup_depth() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace() -> u64 {
    30
}
