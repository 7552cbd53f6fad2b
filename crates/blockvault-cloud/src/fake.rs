//! Scriptable in-memory provider.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use blockvault_core::error::AppError;
use blockvault_core::result::AppResult;
use blockvault_core::traits::{
    BackupCandidate, BackupQuota, BackupRequest, CloudBackupClient, RemoteBackupState,
};

/// A backup held by the fake provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeBackup {
    /// Backup id.
    pub id: String,
    /// Backed-up volume.
    pub volume_id: String,
    /// Owning project.
    pub project_id: String,
    /// Current state.
    pub state: RemoteBackupState,
    /// Whether the backup was requested as incremental.
    pub incremental: bool,
}

/// In-memory [`CloudBackupClient`].
///
/// New backups start `creating`. Tests move them along with
/// [`set_state`](Self::set_state) or [`complete_all`](Self::complete_all);
/// an auto-completing client reports `available` on the first poll.
#[derive(Debug, Default)]
pub struct FakeCloudClient {
    candidates: Mutex<Vec<BackupCandidate>>,
    backups: DashMap<String, FakeBackup>,
    quotas: DashMap<String, BackupQuota>,
    failing_volumes: DashMap<String, AppError>,
    instance_metadata: DashMap<String, HashMap<String, String>>,
    failing_deletes: DashMap<String, AppError>,
    racing_deletes: AtomicBool,
    auto_complete: bool,
    next_id: AtomicU64,
    initiate_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl FakeCloudClient {
    /// An empty provider whose backups stay `creating` until told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty provider whose backups complete when first polled.
    pub fn auto_completing() -> Self {
        Self {
            auto_complete: true,
            ..Self::default()
        }
    }

    /// Add a discoverable volume.
    pub fn add_candidate(&self, candidate: BackupCandidate) {
        if let Ok(mut candidates) = self.candidates.lock() {
            candidates.push(candidate);
        }
    }

    /// Make every initiation for `volume_id` fail permanently.
    pub fn fail_initiation(&self, volume_id: &str, message: &str) {
        self.failing_volumes
            .insert(volume_id.to_string(), AppError::external_service(message));
    }

    /// Make every initiation for `volume_id` fail as if the provider were
    /// unreachable.
    pub fn throttle_initiation(&self, volume_id: &str) {
        self.failing_volumes.insert(
            volume_id.to_string(),
            AppError::service_unavailable(format!("create_backup for {volume_id} timed out")),
        );
    }

    /// Let initiations for `volume_id` succeed again.
    pub fn heal_initiation(&self, volume_id: &str) {
        self.failing_volumes.remove(volume_id);
    }

    /// Make every deletion of `backup_id` fail permanently.
    pub fn fail_deletion(&self, backup_id: &str, message: &str) {
        self.failing_deletes
            .insert(backup_id.to_string(), AppError::external_service(message));
    }

    /// Answer deletions with "not found", as when another client deleted
    /// the backup after its status was read.
    pub fn race_deletes(&self) {
        self.racing_deletes.store(true, Ordering::SeqCst);
    }

    /// Set a metadata entry on a server.
    pub fn set_instance_metadata(&self, instance_id: &str, key: &str, value: &str) {
        self.instance_metadata
            .entry(instance_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Pretend a backup exists at the provider.
    pub fn insert_backup(&self, backup: FakeBackup) {
        self.backups.insert(backup.id.clone(), backup);
    }

    /// Force the state of a backup.
    pub fn set_state(&self, backup_id: &str, state: RemoteBackupState) {
        if let Some(mut backup) = self.backups.get_mut(backup_id) {
            backup.state = state;
        }
    }

    /// Drop a backup without going through `delete_backup`.
    pub fn forget_backup(&self, backup_id: &str) {
        self.backups.remove(backup_id);
    }

    /// Move every `creating` backup to `available`.
    pub fn complete_all(&self) {
        for mut backup in self.backups.iter_mut() {
            if backup.state == RemoteBackupState::Creating {
                backup.state = RemoteBackupState::Available;
            }
        }
    }

    /// Override the quota reported for a project.
    pub fn set_quota(&self, project_id: &str, quota: BackupQuota) {
        self.quotas.insert(project_id.to_string(), quota);
    }

    /// Look up a backup.
    pub fn backup(&self, backup_id: &str) -> Option<FakeBackup> {
        self.backups.get(backup_id).map(|b| b.value().clone())
    }

    /// Number of backups held.
    pub fn backup_count(&self) -> usize {
        self.backups.len()
    }

    /// Number of `initiate_backup` calls, failed ones included.
    pub fn initiate_calls(&self) -> usize {
        self.initiate_calls.load(Ordering::SeqCst)
    }

    /// Number of `delete_backup` calls.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudBackupClient for FakeCloudClient {
    async fn list_backup_candidates(&self, projects: &[String]) -> AppResult<Vec<BackupCandidate>> {
        let candidates = self
            .candidates
            .lock()
            .map_err(|_| AppError::internal("Fake candidate list poisoned"))?;
        Ok(candidates
            .iter()
            .filter(|c| projects.is_empty() || projects.contains(&c.project_id))
            .cloned()
            .collect())
    }

    async fn initiate_backup(&self, request: &BackupRequest) -> AppResult<String> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failing_volumes.get(&request.volume_id) {
            return Err(error.value().clone());
        }

        let id = format!("fake-backup-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.backups.insert(
            id.clone(),
            FakeBackup {
                id: id.clone(),
                volume_id: request.volume_id.clone(),
                project_id: request.project_id.clone(),
                state: RemoteBackupState::Creating,
                incremental: request.incremental,
            },
        );
        debug!(backup_id = %id, volume_id = %request.volume_id, "Fake backup created");
        Ok(id)
    }

    async fn get_backup_status(&self, backup_id: &str) -> AppResult<RemoteBackupState> {
        let Some(mut backup) = self.backups.get_mut(backup_id) else {
            return Ok(RemoteBackupState::Missing);
        };
        if self.auto_complete && backup.state == RemoteBackupState::Creating {
            backup.state = RemoteBackupState::Available;
        }
        Ok(backup.state.clone())
    }

    async fn delete_backup(&self, backup_id: &str, _force: bool) -> AppResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failing_deletes.get(backup_id) {
            return Err(error.value().clone());
        }
        if self.racing_deletes.load(Ordering::SeqCst) {
            self.backups.remove(backup_id);
            return Err(AppError::not_found(format!("Backup {backup_id} could not be found")));
        }
        self.backups.remove(backup_id);
        Ok(())
    }

    async fn list_instance_retention(
        &self,
        _projects: &[String],
        metadata_key: &str,
    ) -> AppResult<HashMap<String, String>> {
        Ok(self
            .instance_metadata
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .get(metadata_key)
                    .map(|policy| (entry.key().clone(), policy.to_lowercase()))
            })
            .collect())
    }

    async fn get_backup_quota(&self, project_id: &str) -> AppResult<BackupQuota> {
        if let Some(quota) = self.quotas.get(project_id) {
            return Ok(*quota);
        }
        let used = self
            .backups
            .iter()
            .filter(|b| b.project_id == project_id)
            .count() as i64;
        Ok(BackupQuota { used, limit: -1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(volume: &str) -> BackupRequest {
        BackupRequest {
            volume_id: volume.into(),
            project_id: "p1".into(),
            name: format!("web_{volume}_0"),
            incremental: false,
            force: true,
        }
    }

    #[tokio::test]
    async fn test_backup_lifecycle() {
        let cloud = FakeCloudClient::new();
        let id = cloud.initiate_backup(&request("v1")).await.expect("initiate");
        assert_eq!(
            cloud.get_backup_status(&id).await.expect("status"),
            RemoteBackupState::Creating
        );
        cloud.complete_all();
        assert!(cloud.get_backup_status(&id).await.expect("status").is_completed());

        cloud.delete_backup(&id, false).await.expect("delete");
        cloud.delete_backup(&id, false).await.expect("idempotent delete");
        assert_eq!(
            cloud.get_backup_status(&id).await.expect("status"),
            RemoteBackupState::Missing
        );
        assert_eq!(cloud.delete_calls(), 2);
    }

    #[tokio::test]
    async fn test_auto_complete_and_failures() {
        let cloud = FakeCloudClient::auto_completing();
        cloud.fail_initiation("v2", "volume busy");
        assert!(cloud.initiate_backup(&request("v2")).await.is_err());
        let id = cloud.initiate_backup(&request("v1")).await.expect("initiate");
        assert_eq!(
            cloud.get_backup_status(&id).await.expect("status"),
            RemoteBackupState::Available
        );
        assert_eq!(cloud.initiate_calls(), 2);
        assert_eq!(
            cloud.get_backup_quota("p1").await.expect("quota"),
            BackupQuota { used: 1, limit: -1 }
        );
    }

    #[tokio::test]
    async fn test_failure_kinds() {
        let cloud = FakeCloudClient::new();
        cloud.fail_initiation("v1", "volume v1 could not be found");
        cloud.throttle_initiation("v2");
        assert!(!cloud.initiate_backup(&request("v1")).await.unwrap_err().is_transient());
        assert!(cloud.initiate_backup(&request("v2")).await.unwrap_err().is_transient());

        let id = cloud.initiate_backup(&request("v3")).await.expect("initiate");
        cloud.race_deletes();
        assert!(cloud.delete_backup(&id, false).await.unwrap_err().is_not_found());
        assert_eq!(cloud.backup_count(), 0);
    }

    #[tokio::test]
    async fn test_instance_retention_map() {
        let cloud = FakeCloudClient::new();
        cloud.set_instance_metadata("i1", "retention", "2W");
        cloud.set_instance_metadata("i2", "owner", "ops");
        let map = cloud
            .list_instance_retention(&[], "retention")
            .await
            .expect("map");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("i1").map(String::as_str), Some("2w"));
    }
}
