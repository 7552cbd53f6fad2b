//! Retention engine: expires backups older than the retention policy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing;

use blockvault_core::config::AppConfig;
use blockvault_core::error::AppError;
use blockvault_core::result::AppResult;
use blockvault_core::traits::CloudBackupClient;
use blockvault_core::types::{Filter, FilterOp, RetentionPolicy};
use blockvault_database::RecordStore;
use blockvault_entity::{BackupRecord, BackupRecordField};

use crate::executor::{PeriodicEngine, TickError};

/// Outcome counts of one retention tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionTickReport {
    /// Threshold of the global policy.
    pub threshold: Option<DateTime<Utc>>,
    /// Instances whose own policy replaced the global one.
    pub instance_policies: usize,
    /// Records older than the threshold that applies to them.
    pub candidates: usize,
    /// Records deleted, with their backups.
    pub deleted: usize,
    /// Records kept because their backup is not in a deletable state.
    pub skipped: usize,
    /// Records whose processing hit an error.
    pub errors: usize,
}

/// What happened to one expired record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Deleted,
    Skipped,
}

/// Where per-instance policies are read from.
#[derive(Debug, Clone)]
struct InstancePolicySource {
    projects: Vec<String>,
    metadata_key: String,
}

/// Retention engine.
///
/// The policy is kept as text and parsed on every tick, so a malformed
/// policy skips retention without affecting anything else. Servers can
/// carry their own policy in metadata; an unreadable one falls back to
/// the global policy.
#[derive(Debug)]
pub struct RetentionEngine {
    store: Arc<dyn RecordStore>,
    cloud: Arc<dyn CloudBackupClient>,
    policy: String,
    instance_policies: Option<InstancePolicySource>,
}

impl RetentionEngine {
    /// Create a new retention engine.
    pub fn new(
        store: Arc<dyn RecordStore>,
        cloud: Arc<dyn CloudBackupClient>,
        policy: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cloud,
            policy: policy.into(),
            instance_policies: None,
        }
    }

    /// Create an engine from the application configuration.
    pub fn from_config(
        store: Arc<dyn RecordStore>,
        cloud: Arc<dyn CloudBackupClient>,
        config: &AppConfig,
    ) -> Self {
        let engine = Self::new(store, cloud, config.conductor.retention_time.clone());
        match &config.conductor.retention_metadata_key {
            Some(key) => engine.with_instance_policies(config.cloud.projects.clone(), key.clone()),
            None => engine,
        }
    }

    /// Let servers of `projects` override the policy through the
    /// `metadata_key` metadata entry.
    pub fn with_instance_policies(
        mut self,
        projects: Vec<String>,
        metadata_key: impl Into<String>,
    ) -> Self {
        self.instance_policies = Some(InstancePolicySource {
            projects,
            metadata_key: metadata_key.into(),
        });
        self
    }

    /// Run one tick against the current time.
    pub async fn run_once(&self) -> Result<RetentionTickReport, TickError> {
        self.run_at(Utc::now()).await
    }

    /// Run one tick as if the current time were `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RetentionTickReport, TickError> {
        let policy: RetentionPolicy = self.policy.parse().map_err(|e: AppError| {
            TickError::Aborted(format!("invalid retention policy: {}", e.message))
        })?;
        let threshold = policy.threshold(now).ok_or_else(|| {
            TickError::Aborted(format!("retention policy {policy} reaches before the calendar start"))
        })?;

        let overrides = self.instance_thresholds(now).await;
        let latest = overrides.values().copied().fold(threshold, Ord::max);

        let filter = Filter::all().and(BackupRecordField::CreatedAt, FilterOp::Lt, latest);
        let expired: Vec<BackupRecord> = self
            .store
            .list_backup_records(&filter)
            .await?
            .into_iter()
            .filter(|r| r.created_at < overrides.get(&r.instance_id).copied().unwrap_or(threshold))
            .collect();

        let mut report = RetentionTickReport {
            threshold: Some(threshold),
            instance_policies: overrides.len(),
            candidates: expired.len(),
            ..RetentionTickReport::default()
        };
        tracing::info!(
            "Retention found {} backups created before {}",
            expired.len(),
            threshold
        );

        for record in &expired {
            match self.expire(record).await {
                Ok(Expiry::Deleted) => report.deleted += 1,
                Ok(Expiry::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        backup_id = %record.backup_id,
                        error = %e,
                        "Failed to expire backup"
                    );
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Thresholds of the instances carrying a valid policy of their own.
    async fn instance_thresholds(&self, now: DateTime<Utc>) -> HashMap<String, DateTime<Utc>> {
        let Some(source) = &self.instance_policies else {
            return HashMap::new();
        };

        let raw = match self
            .cloud
            .list_instance_retention(&source.projects, &source.metadata_key)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read instance retention policies, using the global policy");
                return HashMap::new();
            }
        };

        let mut thresholds = HashMap::new();
        for (instance_id, text) in raw {
            match text.parse::<RetentionPolicy>().ok().and_then(|p| p.threshold(now)) {
                Some(threshold) => {
                    thresholds.insert(instance_id, threshold);
                }
                None => tracing::warn!(
                    instance_id = %instance_id,
                    policy = %text,
                    "Invalid instance retention policy, using the global policy"
                ),
            }
        }
        thresholds
    }

    async fn expire(&self, record: &BackupRecord) -> AppResult<Expiry> {
        let state = self.cloud.get_backup_status(&record.backup_id).await?;

        if !state.exists() {
            tracing::info!(
                backup_id = %record.backup_id,
                "Backup already absent at the provider, removing record"
            );
            self.store.delete_backup_record(record.id).await?;
            return Ok(Expiry::Deleted);
        }
        if !state.is_deletable() {
            tracing::debug!(
                backup_id = %record.backup_id,
                state = %state,
                "Expired backup not deletable yet"
            );
            return Ok(Expiry::Skipped);
        }

        match self.cloud.delete_backup(&record.backup_id, false).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(backup_id = %record.backup_id, "Backup vanished before deletion");
            }
            Err(e) => return Err(e),
        }
        self.store.delete_backup_record(record.id).await?;
        tracing::info!(
            backup_id = %record.backup_id,
            volume_id = %record.volume_id,
            created_at = %record.created_at,
            "Expired backup deleted"
        );
        Ok(Expiry::Deleted)
    }
}

#[async_trait]
impl PeriodicEngine for RetentionEngine {
    fn name(&self) -> &str {
        "retention"
    }

    async fn tick(&self) -> Result<Value, TickError> {
        let report = self.run_once().await?;
        Ok(serde_json::to_value(&report).map_err(AppError::from)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockvault_cloud::FakeCloudClient;
    use blockvault_cloud::fake::FakeBackup;
    use blockvault_core::traits::RemoteBackupState;
    use blockvault_database::MemoryRecordStore;
    use blockvault_entity::NewBackupRecord;
    use chrono::Duration;

    fn seed(
        store: &MemoryRecordStore,
        cloud: &FakeCloudClient,
        backup_id: &str,
        age_days: i64,
        state: Option<RemoteBackupState>,
    ) {
        seed_for(store, cloud, "i1", backup_id, age_days, state);
    }

    fn seed_for(
        store: &MemoryRecordStore,
        cloud: &FakeCloudClient,
        instance_id: &str,
        backup_id: &str,
        age_days: i64,
        state: Option<RemoteBackupState>,
    ) {
        store.insert_backup_record(BackupRecord::from_new(
            NewBackupRecord {
                backup_id: backup_id.into(),
                project_id: "p1".into(),
                volume_id: "v1".into(),
                instance_id: instance_id.into(),
                completed: true,
                incremental: false,
            },
            Utc::now() - Duration::days(age_days),
        ));
        if let Some(state) = state {
            cloud.insert_backup(FakeBackup {
                id: backup_id.into(),
                volume_id: "v1".into(),
                project_id: "p1".into(),
                state,
                incremental: false,
            });
        }
    }

    #[tokio::test]
    async fn test_expires_only_deletable_old_backups() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        seed(&store, &cloud, "old-available", 30, Some(RemoteBackupState::Available));
        seed(&store, &cloud, "old-creating", 30, Some(RemoteBackupState::Creating));
        seed(&store, &cloud, "old-deleting", 30, Some(RemoteBackupState::Deleting));
        seed(&store, &cloud, "fresh", 1, Some(RemoteBackupState::Available));

        let engine = RetentionEngine::new(store.clone(), cloud.clone(), "1w");
        let report = engine.run_once().await.expect("tick");

        assert_eq!(report.candidates, 3);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.skipped, 2);
        assert!(cloud.backup("old-available").is_none());
        assert!(store.backup_record_by_backup_id("old-available").is_none());
        assert!(store.backup_record_by_backup_id("old-creating").is_some());
        assert!(store.backup_record_by_backup_id("fresh").is_some());
    }

    #[tokio::test]
    async fn test_absent_backup_record_removed() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        seed(&store, &cloud, "gone", 30, None);

        let engine = RetentionEngine::new(store.clone(), cloud.clone(), "2w3d");
        let report = engine.run_once().await.expect("tick");

        assert_eq!(report.deleted, 1);
        assert_eq!(report.errors, 0);
        assert!(store.backup_record_by_backup_id("gone").is_none());
        assert_eq!(cloud.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_policy_aborts_without_mutation() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        seed(&store, &cloud, "old", 400, Some(RemoteBackupState::Available));

        for policy in ["", "soon", "3x"] {
            let engine = RetentionEngine::new(store.clone(), cloud.clone(), policy);
            let err = engine.run_once().await.expect_err("malformed");
            assert!(matches!(err, TickError::Aborted(_)));
        }
        assert!(store.backup_record_by_backup_id("old").is_some());
        assert!(cloud.backup("old").is_some());
        assert_eq!(cloud.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_instance_policies_override_global() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        cloud.set_instance_metadata("i-long", "retention", "8W");
        cloud.set_instance_metadata("i-short", "retention", "1d");
        cloud.set_instance_metadata("i-bad", "retention", "forever");
        let available = Some(RemoteBackupState::Available);
        seed_for(&store, &cloud, "i-long", "long-30d", 30, available.clone());
        seed_for(&store, &cloud, "i-short", "short-3d", 3, available.clone());
        seed_for(&store, &cloud, "i-bad", "bad-30d", 30, available.clone());
        seed_for(&store, &cloud, "i-plain", "plain-3d", 3, available);

        let engine = RetentionEngine::new(store.clone(), cloud.clone(), "1w")
            .with_instance_policies(vec!["p1".into()], "retention");
        let report = engine.run_once().await.expect("tick");

        assert_eq!(report.instance_policies, 2);
        assert_eq!(report.candidates, 2);
        assert_eq!(report.deleted, 2);
        assert!(store.backup_record_by_backup_id("long-30d").is_some());
        assert!(store.backup_record_by_backup_id("short-3d").is_none());
        assert!(store.backup_record_by_backup_id("bad-30d").is_none());
        assert!(store.backup_record_by_backup_id("plain-3d").is_some());
    }

    #[tokio::test]
    async fn test_from_config_reads_metadata_key() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        cloud.set_instance_metadata("i1", "keep_for", "1d");
        seed(&store, &cloud, "recent", 3, Some(RemoteBackupState::Available));

        let mut config = AppConfig::default();
        config.conductor.retention_time = "1w".into();
        let plain = RetentionEngine::from_config(store.clone(), cloud.clone(), &config);
        assert_eq!(plain.run_once().await.expect("tick").deleted, 0);

        config.conductor.retention_metadata_key = Some("keep_for".into());
        let engine = RetentionEngine::from_config(store.clone(), cloud.clone(), &config);
        assert_eq!(engine.run_once().await.expect("tick").deleted, 1);
    }

    #[tokio::test]
    async fn test_backup_deleted_concurrently_still_expires() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        seed(&store, &cloud, "contested", 30, Some(RemoteBackupState::Available));
        cloud.race_deletes();

        let engine = RetentionEngine::new(store.clone(), cloud.clone(), "1w");
        let report = engine.run_once().await.expect("tick");

        assert_eq!(report.deleted, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(cloud.delete_calls(), 1);
        assert!(store.backup_record_by_backup_id("contested").is_none());
    }
}
