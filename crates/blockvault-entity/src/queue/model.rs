//! Queue task entity model.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use blockvault_core::error::AppError;
use blockvault_core::result::AppResult;
use blockvault_core::traits::cloud::BackupCandidate;
use blockvault_core::types::filter::{self, FilterField, FilterValue, Filterable};
use blockvault_core::types::id::QueueTaskId;

use super::status::QueueTaskStatus;

/// "This volume should be backed up this cycle."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QueueTask {
    /// Unique task identifier.
    pub id: QueueTaskId,
    /// Project owning the volume.
    pub project_id: String,
    /// Volume to back up.
    pub volume_id: String,
    /// Volume display name.
    pub volume_name: String,
    /// Server the volume is attached to.
    pub instance_id: String,
    /// Server display name.
    pub instance_name: String,
    /// Provider backup id once initiated.
    pub backup_id: Option<String>,
    /// Current status.
    pub status: QueueTaskStatus,
    /// Whether an incremental backup is requested.
    pub incremental: bool,
    /// Failure reason for failed tasks.
    pub reason: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last updated.
    pub updated_at: DateTime<Utc>,
}

impl QueueTask {
    /// Name given to the backup at the provider (at most 255 chars).
    pub fn backup_name(&self, now: DateTime<Utc>) -> String {
        let name = format!(
            "{}_{}_{}",
            self.instance_name,
            self.volume_name,
            now.timestamp()
        );
        name.chars().take(255).collect()
    }

    /// Build the stored task from a create payload.
    pub fn from_new(data: NewQueueTask, now: DateTime<Utc>) -> Self {
        Self {
            id: data.id.unwrap_or_default(),
            project_id: data.project_id,
            volume_id: data.volume_id,
            volume_name: data.volume_name,
            instance_id: data.instance_id,
            instance_name: data.instance_name,
            backup_id: None,
            status: QueueTaskStatus::Planned,
            incremental: data.incremental,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Data required to plan a new queue task. New tasks are always
/// [`QueueTaskStatus::Planned`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueueTask {
    /// Explicit id; generated when absent.
    pub id: Option<QueueTaskId>,
    /// Project owning the volume.
    pub project_id: String,
    /// Volume to back up.
    pub volume_id: String,
    /// Volume display name.
    pub volume_name: String,
    /// Server the volume is attached to.
    pub instance_id: String,
    /// Server display name.
    pub instance_name: String,
    /// Whether an incremental backup is requested.
    pub incremental: bool,
}

impl NewQueueTask {
    /// Plan a backup of a discovered candidate.
    pub fn from_candidate(candidate: &BackupCandidate, incremental: bool) -> Self {
        Self {
            id: None,
            project_id: candidate.project_id.clone(),
            volume_id: candidate.volume_id.clone(),
            volume_name: candidate.volume_name.clone(),
            instance_id: candidate.instance_id.clone(),
            instance_name: candidate.instance_name.clone(),
            incremental,
        }
    }
}

/// Partial update of a queue task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTaskUpdate {
    /// New status; must be a permitted transition.
    pub status: Option<QueueTaskStatus>,
    /// Provider backup id.
    pub backup_id: Option<String>,
    /// Backup mode for the next initiation.
    pub incremental: Option<bool>,
    /// Failure reason.
    pub reason: Option<String>,
}

impl QueueTaskUpdate {
    /// Move to `status`.
    pub fn status(status: QueueTaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Record that the backup was initiated as `backup_id`.
    pub fn initiated(backup_id: impl Into<String>) -> Self {
        Self {
            status: Some(QueueTaskStatus::Wip),
            backup_id: Some(backup_id.into()),
            ..Self::default()
        }
    }

    /// Abandon the task with a reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(QueueTaskStatus::Failed),
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Request a full backup on the next attempt.
    pub fn downgrade_to_full() -> Self {
        Self {
            incremental: Some(false),
            ..Self::default()
        }
    }

    /// Apply to a stored task, rejecting status regressions.
    pub fn apply(&self, task: &mut QueueTask, now: DateTime<Utc>) -> AppResult<()> {
        if let Some(next) = self.status {
            if !task.status.can_transition_to(next) {
                return Err(AppError::conflict(format!(
                    "Queue task {} cannot move from {} to {}",
                    task.id, task.status, next
                )));
            }
            task.status = next;
        }
        if let Some(backup_id) = &self.backup_id {
            task.backup_id = Some(backup_id.clone());
        }
        if let Some(incremental) = self.incremental {
            task.incremental = incremental;
        }
        if let Some(reason) = &self.reason {
            task.reason = Some(reason.chars().take(255).collect());
        }
        task.updated_at = now;
        Ok(())
    }
}

/// Filterable columns of a queue task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTaskField {
    /// Task id.
    Id,
    /// Project id.
    ProjectId,
    /// Volume id.
    VolumeId,
    /// Instance id.
    InstanceId,
    /// Provider backup id.
    BackupId,
    /// Status.
    Status,
    /// Incremental flag.
    Incremental,
    /// Creation time.
    CreatedAt,
    /// Last update time.
    UpdatedAt,
}

impl FromStr for QueueTaskField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "project_id" => Ok(Self::ProjectId),
            "volume_id" => Ok(Self::VolumeId),
            "instance_id" => Ok(Self::InstanceId),
            "backup_id" => Ok(Self::BackupId),
            "status" | "backup_status" => Ok(Self::Status),
            "incremental" => Ok(Self::Incremental),
            "created_at" => Ok(Self::CreatedAt),
            "updated_at" => Ok(Self::UpdatedAt),
            other => Err(AppError::validation(format!(
                "Queue tasks cannot be filtered by '{other}'"
            ))),
        }
    }
}

impl FilterField for QueueTaskField {
    fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::ProjectId => "project_id",
            Self::VolumeId => "volume_id",
            Self::InstanceId => "instance_id",
            Self::BackupId => "backup_id",
            Self::Status => "status::text",
            Self::Incremental => "incremental",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }

    fn parse_value(&self, raw: &str) -> AppResult<FilterValue> {
        match self {
            Self::Id => filter::parse_uuid(raw),
            Self::Status => raw
                .parse::<QueueTaskStatus>()
                .map(|s| FilterValue::from(s.as_str())),
            Self::Incremental => filter::parse_bool(raw),
            Self::CreatedAt | Self::UpdatedAt => filter::parse_timestamp(raw),
            Self::ProjectId | Self::VolumeId | Self::InstanceId | Self::BackupId => {
                Ok(FilterValue::from(raw))
            }
        }
    }
}

impl Filterable for QueueTask {
    type Field = QueueTaskField;

    fn field_value(&self, field: QueueTaskField) -> Option<FilterValue> {
        Some(match field {
            QueueTaskField::Id => FilterValue::Uuid(self.id.into_uuid()),
            QueueTaskField::ProjectId => FilterValue::from(self.project_id.as_str()),
            QueueTaskField::VolumeId => FilterValue::from(self.volume_id.as_str()),
            QueueTaskField::InstanceId => FilterValue::from(self.instance_id.as_str()),
            QueueTaskField::BackupId => FilterValue::from(self.backup_id.clone()?),
            QueueTaskField::Status => FilterValue::from(self.status.as_str()),
            QueueTaskField::Incremental => FilterValue::Boolean(self.incremental),
            QueueTaskField::CreatedAt => FilterValue::Timestamp(self.created_at),
            QueueTaskField::UpdatedAt => FilterValue::Timestamp(self.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockvault_core::types::filter::{Filter, FilterOp};

    fn task() -> QueueTask {
        let candidate = BackupCandidate {
            project_id: "p1".into(),
            volume_id: "v1".into(),
            volume_name: "data".into(),
            instance_id: "i1".into(),
            instance_name: "web".into(),
        };
        QueueTask::from_new(NewQueueTask::from_candidate(&candidate, true), Utc::now())
    }

    #[test]
    fn test_new_task_is_planned() {
        let t = task();
        assert_eq!(t.status, QueueTaskStatus::Planned);
        assert!(t.backup_id.is_none());
        assert!(t.incremental);
    }

    #[test]
    fn test_apply_initiated() {
        let mut t = task();
        QueueTaskUpdate::initiated("b-1")
            .apply(&mut t, Utc::now())
            .expect("planned -> wip");
        assert_eq!(t.status, QueueTaskStatus::Wip);
        assert_eq!(t.backup_id.as_deref(), Some("b-1"));
    }

    #[test]
    fn test_apply_rejects_regression() {
        let mut t = task();
        t.status = QueueTaskStatus::Completed;
        let before = t.clone();
        let err = QueueTaskUpdate::status(QueueTaskStatus::Planned)
            .apply(&mut t, Utc::now())
            .expect_err("regression");
        assert_eq!(err.kind, blockvault_core::error::ErrorKind::Conflict);
        assert_eq!(t, before);
    }

    #[test]
    fn test_backup_name_truncated() {
        let mut t = task();
        t.instance_name = "x".repeat(300);
        assert_eq!(t.backup_name(Utc::now()).chars().count(), 255);
    }

    #[test]
    fn test_filter_by_status() {
        let t = task();
        let planned = Filter::all().eq(QueueTaskField::Status, "planned");
        let wip = Filter::<QueueTaskField>::parse_pairs([("backup_status", "wip")]).expect("parse");
        assert!(planned.matches(&t));
        assert!(!wip.matches(&t));
        let missing_backup = Filter::all().and(QueueTaskField::BackupId, FilterOp::Neq, "b");
        assert!(!missing_backup.matches(&t));
    }
}
