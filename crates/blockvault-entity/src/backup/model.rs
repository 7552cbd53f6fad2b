//! Backup record entity model.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use blockvault_core::error::AppError;
use blockvault_core::result::AppResult;
use blockvault_core::types::filter::{self, FilterField, FilterValue, Filterable};
use blockvault_core::types::id::BackupRecordId;

/// Durable record of one backup initiated at the provider.
///
/// A record whose `completed` flag is unset describes a backup that may
/// still be in progress; its real state lives at the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BackupRecord {
    /// Unique record identifier.
    pub id: BackupRecordId,
    /// Provider backup id.
    pub backup_id: String,
    /// Project owning the volume.
    pub project_id: String,
    /// Backed-up volume.
    pub volume_id: String,
    /// Server the volume was attached to.
    pub instance_id: String,
    /// Whether the provider reported the backup finished.
    pub completed: bool,
    /// Whether the backup is incremental.
    pub incremental: bool,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl BackupRecord {
    /// Build the stored record from a create payload.
    pub fn from_new(data: NewBackupRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: BackupRecordId::new(),
            backup_id: data.backup_id,
            project_id: data.project_id,
            volume_id: data.volume_id,
            instance_id: data.instance_id,
            completed: data.completed,
            incremental: data.incremental,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Data required to create a backup record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBackupRecord {
    /// Provider backup id.
    pub backup_id: String,
    /// Project owning the volume.
    pub project_id: String,
    /// Backed-up volume.
    pub volume_id: String,
    /// Server the volume is attached to.
    pub instance_id: String,
    /// Whether the backup already finished.
    pub completed: bool,
    /// Whether the backup is incremental.
    pub incremental: bool,
}

/// Partial update of a backup record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecordUpdate {
    /// New completion flag.
    pub completed: Option<bool>,
}

impl BackupRecordUpdate {
    /// Mark the backup finished.
    pub fn completed() -> Self {
        Self {
            completed: Some(true),
        }
    }

    /// Apply to a stored record.
    pub fn apply(&self, record: &mut BackupRecord, now: DateTime<Utc>) {
        if let Some(completed) = self.completed {
            record.completed = completed;
        }
        record.updated_at = now;
    }
}

/// Filterable columns of a backup record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupRecordField {
    /// Record id.
    Id,
    /// Provider backup id.
    BackupId,
    /// Project id.
    ProjectId,
    /// Volume id.
    VolumeId,
    /// Instance id.
    InstanceId,
    /// Completion flag.
    Completed,
    /// Incremental flag.
    Incremental,
    /// Creation time.
    CreatedAt,
    /// Last update time.
    UpdatedAt,
}

impl FromStr for BackupRecordField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "backup_id" => Ok(Self::BackupId),
            "project_id" => Ok(Self::ProjectId),
            "volume_id" => Ok(Self::VolumeId),
            "instance_id" => Ok(Self::InstanceId),
            "completed" | "backup_completed" => Ok(Self::Completed),
            "incremental" => Ok(Self::Incremental),
            "created_at" => Ok(Self::CreatedAt),
            "updated_at" => Ok(Self::UpdatedAt),
            other => Err(AppError::validation(format!(
                "Backup records cannot be filtered by '{other}'"
            ))),
        }
    }
}

impl FilterField for BackupRecordField {
    fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::BackupId => "backup_id",
            Self::ProjectId => "project_id",
            Self::VolumeId => "volume_id",
            Self::InstanceId => "instance_id",
            Self::Completed => "completed",
            Self::Incremental => "incremental",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }

    fn parse_value(&self, raw: &str) -> AppResult<FilterValue> {
        match self {
            Self::Id => filter::parse_uuid(raw),
            Self::Completed | Self::Incremental => filter::parse_bool(raw),
            Self::CreatedAt | Self::UpdatedAt => filter::parse_timestamp(raw),
            Self::BackupId | Self::ProjectId | Self::VolumeId | Self::InstanceId => {
                Ok(FilterValue::from(raw))
            }
        }
    }
}

impl Filterable for BackupRecord {
    type Field = BackupRecordField;

    fn field_value(&self, field: BackupRecordField) -> Option<FilterValue> {
        Some(match field {
            BackupRecordField::Id => FilterValue::Uuid(self.id.into_uuid()),
            BackupRecordField::BackupId => FilterValue::from(self.backup_id.as_str()),
            BackupRecordField::ProjectId => FilterValue::from(self.project_id.as_str()),
            BackupRecordField::VolumeId => FilterValue::from(self.volume_id.as_str()),
            BackupRecordField::InstanceId => FilterValue::from(self.instance_id.as_str()),
            BackupRecordField::Completed => FilterValue::Boolean(self.completed),
            BackupRecordField::Incremental => FilterValue::Boolean(self.incremental),
            BackupRecordField::CreatedAt => FilterValue::Timestamp(self.created_at),
            BackupRecordField::UpdatedAt => FilterValue::Timestamp(self.updated_at),
        })
    }
}
