//! Cloud backup client abstraction.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;

/// A volume that should be backed up in the next cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupCandidate {
    /// Owning project.
    pub project_id: String,
    /// Volume to back up.
    pub volume_id: String,
    /// Volume display name (falls back to the id).
    pub volume_name: String,
    /// Server the volume is attached to.
    pub instance_id: String,
    /// Server display name.
    pub instance_name: String,
}

/// Parameters for starting a backup at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRequest {
    /// Volume to back up.
    pub volume_id: String,
    /// Project owning the volume.
    pub project_id: String,
    /// Backup display name.
    pub name: String,
    /// Request an incremental backup.
    pub incremental: bool,
    /// Back up even if the volume is attached.
    pub force: bool,
}

/// Provider-side state of a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteBackupState {
    /// Still being written.
    Creating,
    /// Finished and usable.
    Available,
    /// Creation failed.
    Error,
    /// Deletion in progress.
    Deleting,
    /// Being restored to a volume.
    Restoring,
    /// A restore from this backup failed.
    ErrorRestoring,
    /// The provider does not know the backup.
    Missing,
    /// A state this client does not recognise.
    Unknown(String),
}

impl RemoteBackupState {
    /// Map a provider status string.
    pub fn from_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "creating" => Self::Creating,
            "available" => Self::Available,
            "error" => Self::Error,
            "deleting" => Self::Deleting,
            "restoring" => Self::Restoring,
            "error_restoring" => Self::ErrorRestoring,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether the provider still holds the backup.
    pub fn exists(&self) -> bool {
        !matches!(self, Self::Missing)
    }

    /// Whether the backup finished writing at some point.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            Self::Available | Self::Restoring | Self::Deleting | Self::ErrorRestoring
        )
    }

    /// Whether creation failed at the provider.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Whether the backup is in a terminal state that can be deleted.
    pub fn is_deletable(&self) -> bool {
        matches!(self, Self::Available | Self::Error | Self::ErrorRestoring)
    }
}

impl fmt::Display for RemoteBackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => f.write_str("creating"),
            Self::Available => f.write_str("available"),
            Self::Error => f.write_str("error"),
            Self::Deleting => f.write_str("deleting"),
            Self::Restoring => f.write_str("restoring"),
            Self::ErrorRestoring => f.write_str("error_restoring"),
            Self::Missing => f.write_str("missing"),
            Self::Unknown(s) => write!(f, "unknown({s})"),
        }
    }
}

/// Backup count quota of one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupQuota {
    /// Backups currently held.
    pub used: i64,
    /// Maximum backups allowed; negative means unlimited.
    pub limit: i64,
}

impl BackupQuota {
    /// Whether no further backup fits the quota.
    pub fn is_exhausted(&self) -> bool {
        self.limit >= 0 && self.used >= self.limit
    }
}

/// Remote operations against the cloud provider.
///
/// Implementations apply their retry policy to every call, except that a
/// backup creation is only sent again when the provider cannot have acted
/// on it. Errors that reach the caller are final for the current tick;
/// transient ones report [`AppError::is_transient`](crate::error::AppError::is_transient).
/// `delete_backup` of an unknown backup succeeds.
#[async_trait]
pub trait CloudBackupClient: Send + Sync + fmt::Debug + 'static {
    /// Discover volumes to back up within the given projects.
    async fn list_backup_candidates(&self, projects: &[String]) -> AppResult<Vec<BackupCandidate>>;

    /// Start a backup and return the provider's backup id.
    async fn initiate_backup(&self, request: &BackupRequest) -> AppResult<String>;

    /// Fetch the provider-side state of a backup.
    async fn get_backup_status(&self, backup_id: &str) -> AppResult<RemoteBackupState>;

    /// Delete a backup; an already absent backup is not an error.
    async fn delete_backup(&self, backup_id: &str, force: bool) -> AppResult<()>;

    /// Fetch the backup quota usage of a project.
    async fn get_backup_quota(&self, project_id: &str) -> AppResult<BackupQuota>;

    /// Map each server of the given projects that carries `metadata_key`
    /// to the lowercased value of that entry.
    async fn list_instance_retention(
        &self,
        projects: &[String],
        metadata_key: &str,
    ) -> AppResult<HashMap<String, String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(RemoteBackupState::from_status("AVAILABLE"), RemoteBackupState::Available);
        assert_eq!(
            RemoteBackupState::from_status("error_restoring"),
            RemoteBackupState::ErrorRestoring
        );
        assert_eq!(
            RemoteBackupState::from_status("backing-up"),
            RemoteBackupState::Unknown("backing-up".to_string())
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(!RemoteBackupState::Creating.is_completed());
        assert!(!RemoteBackupState::Creating.is_deletable());
        assert!(!RemoteBackupState::Deleting.is_deletable());
        assert!(RemoteBackupState::Available.is_deletable());
        assert!(RemoteBackupState::Error.is_deletable());
        assert!(!RemoteBackupState::Missing.exists());
        assert!(RemoteBackupState::Unknown("x".into()).exists());
    }

    #[test]
    fn test_quota_exhausted() {
        assert!(BackupQuota { used: 5, limit: 5 }.is_exhausted());
        assert!(!BackupQuota { used: 4, limit: 5 }.is_exhausted());
        assert!(!BackupQuota { used: 99, limit: -1 }.is_exhausted());
    }
}
