//! Backup creation engine: drives queue tasks from planned to completed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing;

use blockvault_core::config::AppConfig;
use blockvault_core::error::AppError;
use blockvault_core::result::AppResult;
use blockvault_core::traits::{BackupRequest, CloudBackupClient, RemoteBackupState};
use blockvault_core::types::Filter;
use blockvault_database::RecordStore;
use blockvault_entity::{
    BackupRecordField, BackupRecordUpdate, NewBackupRecord, QueueTask, QueueTaskField,
    QueueTaskStatus, QueueTaskUpdate,
};

use crate::executor::{PeriodicEngine, TickError};
use crate::queue::TaskQueue;
use crate::quota::QuotaGate;

/// Provider message for an incremental request with no full backup behind it.
const NO_FULL_BACKUP_MESSAGE: &str = "No backups available to do an incremental backup";

/// Width of the `reason` column.
const MAX_REASON_CHARS: usize = 255;

/// Settings of the backup creation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSettings {
    /// Projects scanned for candidates.
    pub projects: Vec<String>,
    /// Backup record count at which new backups stop.
    pub max_backup_count: u64,
    /// Skip volumes backed up within this many seconds.
    pub min_interval_seconds: u64,
    /// Recent backups inspected when choosing incremental mode.
    pub full_backup_depth: u32,
    /// Back up attached volumes.
    pub force_create: bool,
    /// Delete a cohort once all its tasks are terminal.
    pub purge_drained_cohorts: bool,
}

impl BackupSettings {
    /// Extract the engine settings from the application configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            projects: config.cloud.projects.clone(),
            max_backup_count: config.conductor.max_backup_count,
            min_interval_seconds: config.conductor.backup_min_interval_seconds,
            full_backup_depth: config.conductor.full_backup_depth,
            force_create: config.cloud.force_create,
            purge_drained_cohorts: config.conductor.purge_drained_cohorts,
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Outcome counts of one backup tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupTickReport {
    /// The backup count ceiling was reached; no new work was started.
    pub over_quota: bool,
    /// Tasks created by the queue refresh.
    pub seeded: usize,
    /// Planned tasks whose backup was started.
    pub initiated: usize,
    /// Planned tasks left planned after a retryable refusal.
    pub deferred: usize,
    /// In-progress tasks that completed.
    pub completed: usize,
    /// Tasks that failed, at initiation or at the provider.
    pub failed: usize,
    /// In-progress tasks still running at the provider.
    pub pending: usize,
    /// Tasks whose processing hit a local error.
    pub errors: usize,
    /// Tasks deleted with a drained cohort.
    pub purged: usize,
}

/// What happened to one in-progress task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Completed,
    Failed,
    Pending,
}

/// What happened to one planned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartOutcome {
    Initiated,
    Deferred,
    Rejected,
}

/// Backup creation engine.
///
/// One tick checks the quota, refreshes the queue, polls in-progress tasks
/// and then starts planned ones. Over quota, only the polling happens.
#[derive(Debug)]
pub struct BackupEngine {
    store: Arc<dyn RecordStore>,
    cloud: Arc<dyn CloudBackupClient>,
    quota: QuotaGate,
    queue: TaskQueue,
    settings: BackupSettings,
}

impl BackupEngine {
    /// Create a new backup engine.
    pub fn new(
        store: Arc<dyn RecordStore>,
        cloud: Arc<dyn CloudBackupClient>,
        settings: BackupSettings,
    ) -> Self {
        let quota = QuotaGate::new(store.clone(), settings.max_backup_count);
        let queue = TaskQueue::new(store.clone(), cloud.clone(), settings.projects.clone())
            .with_min_interval(settings.min_interval_seconds)
            .with_full_backup_depth(settings.full_backup_depth);
        Self {
            store,
            cloud,
            quota,
            queue,
            settings,
        }
    }

    /// The quota gate used by this engine.
    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    /// Run one tick.
    ///
    /// Failures of a single task are logged and counted; only store
    /// failures while listing abort the tick.
    pub async fn run_once(&self) -> Result<BackupTickReport, TickError> {
        let mut report = BackupTickReport {
            over_quota: self.quota.is_over_limit().await?,
            ..BackupTickReport::default()
        };

        if !report.over_quota {
            report.seeded = self.queue.refresh().await?;
        }

        self.poll_in_progress(&mut report).await?;

        if report.over_quota {
            tracing::info!("Over quota, not starting planned backups this tick");
        } else {
            self.start_planned(&mut report).await?;
        }

        if self.settings.purge_drained_cohorts {
            report.purged = self.queue.purge_drained().await?;
        }

        Ok(report)
    }

    async fn poll_in_progress(&self, report: &mut BackupTickReport) -> AppResult<()> {
        let tasks = self.tasks_with_status(QueueTaskStatus::Wip).await?;

        for task in &tasks {
            match self.poll_task(task).await {
                Ok(PollOutcome::Completed) => report.completed += 1,
                Ok(PollOutcome::Failed) => report.failed += 1,
                Ok(PollOutcome::Pending) => report.pending += 1,
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "Failed to poll backup task");
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn poll_task(&self, task: &QueueTask) -> AppResult<PollOutcome> {
        let Some(backup_id) = task.backup_id.as_deref() else {
            self.fail_task(task, "in-progress task has no backup id").await?;
            return Ok(PollOutcome::Failed);
        };

        let state = self.cloud.get_backup_status(backup_id).await?;
        match state {
            s if s.is_completed() => {
                self.mark_record_completed(task, backup_id).await?;
                self.store
                    .update_queue_task(task.id, &QueueTaskUpdate::status(QueueTaskStatus::Completed))
                    .await?;
                tracing::info!(
                    task_id = %task.id,
                    volume_id = %task.volume_id,
                    backup_id = %backup_id,
                    "Backup completed"
                );
                Ok(PollOutcome::Completed)
            }
            RemoteBackupState::Error => {
                self.discard_failed_backup(task, backup_id).await?;
                self.fail_task(task, &format!("backup {backup_id} failed at the provider"))
                    .await?;
                Ok(PollOutcome::Failed)
            }
            RemoteBackupState::Missing => {
                self.fail_task(task, &format!("backup {backup_id} no longer exists"))
                    .await?;
                Ok(PollOutcome::Failed)
            }
            other => {
                tracing::debug!(task_id = %task.id, backup_id = %backup_id, state = %other, "Backup still in progress");
                Ok(PollOutcome::Pending)
            }
        }
    }

    /// Delete a backup that failed at the provider together with its
    /// record. When the provider refuses, the record stays for retention.
    async fn discard_failed_backup(&self, task: &QueueTask, backup_id: &str) -> AppResult<()> {
        if let Err(e) = self.cloud.delete_backup(backup_id, false).await {
            tracing::warn!(
                task_id = %task.id,
                backup_id = %backup_id,
                error = %e,
                "Could not delete failed backup, leaving it to retention"
            );
            return Ok(());
        }

        let filter = Filter::all().eq(BackupRecordField::BackupId, backup_id);
        for record in self.store.list_backup_records(&filter).await? {
            self.store.delete_backup_record(record.id).await?;
        }
        tracing::info!(task_id = %task.id, backup_id = %backup_id, "Failed backup deleted");
        Ok(())
    }

    /// Set the completion flag of the task's record, recreating the
    /// record if it was lost.
    async fn mark_record_completed(&self, task: &QueueTask, backup_id: &str) -> AppResult<()> {
        let filter = Filter::all().eq(BackupRecordField::BackupId, backup_id);
        let existing = self.store.list_backup_records(&filter).await?;

        match existing.first() {
            Some(record) if record.completed => Ok(()),
            Some(record) => {
                self.store
                    .update_backup_record(record.id, &BackupRecordUpdate::completed())
                    .await?;
                Ok(())
            }
            None => {
                tracing::warn!(
                    task_id = %task.id,
                    backup_id = %backup_id,
                    "Backup record missing for a completed backup, recreating it"
                );
                self.store
                    .create_backup_record(NewBackupRecord {
                        backup_id: backup_id.to_string(),
                        project_id: task.project_id.clone(),
                        volume_id: task.volume_id.clone(),
                        instance_id: task.instance_id.clone(),
                        completed: true,
                        incremental: task.incremental,
                    })
                    .await?;
                Ok(())
            }
        }
    }

    async fn start_planned(&self, report: &mut BackupTickReport) -> AppResult<()> {
        let tasks = self.tasks_with_status(QueueTaskStatus::Planned).await?;

        for task in &tasks {
            match self.start_task(task).await {
                Ok(StartOutcome::Initiated) => report.initiated += 1,
                Ok(StartOutcome::Deferred) => report.deferred += 1,
                Ok(StartOutcome::Rejected) => report.failed += 1,
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "Failed to start backup task");
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }

    /// Start the backup of a planned task.
    async fn start_task(&self, task: &QueueTask) -> AppResult<StartOutcome> {
        let request = BackupRequest {
            volume_id: task.volume_id.clone(),
            project_id: task.project_id.clone(),
            name: task.backup_name(Utc::now()),
            incremental: task.incremental,
            force: self.settings.force_create,
        };

        let backup_id = match self.cloud.initiate_backup(&request).await {
            Ok(id) => id,
            Err(e) => return self.handle_refusal(task, &e).await,
        };

        // The task is moved first so that a lost record is recreated on
        // completion instead of the volume being backed up twice.
        self.store
            .update_queue_task(task.id, &QueueTaskUpdate::initiated(backup_id.clone()))
            .await?;
        self.store
            .create_backup_record(NewBackupRecord {
                backup_id: backup_id.clone(),
                project_id: task.project_id.clone(),
                volume_id: task.volume_id.clone(),
                instance_id: task.instance_id.clone(),
                completed: false,
                incremental: task.incremental,
            })
            .await?;

        tracing::info!(
            task_id = %task.id,
            volume_id = %task.volume_id,
            backup_id = %backup_id,
            incremental = task.incremental,
            "Backup started"
        );
        Ok(StartOutcome::Initiated)
    }

    /// Decide what a refused initiation means for the task.
    ///
    /// An incremental request without a full backup to build on is retried
    /// as a full one, and an unreachable provider is retried as is. Any
    /// other refusal is final, so the cohort can still drain.
    async fn handle_refusal(&self, task: &QueueTask, cause: &AppError) -> AppResult<StartOutcome> {
        if task.incremental && cause.message.contains(NO_FULL_BACKUP_MESSAGE) {
            self.store
                .update_queue_task(task.id, &QueueTaskUpdate::downgrade_to_full())
                .await?;
            tracing::info!(
                task_id = %task.id,
                volume_id = %task.volume_id,
                "No full backup to build on, next attempt will be a full backup"
            );
            return Ok(StartOutcome::Deferred);
        }

        if cause.is_transient() {
            tracing::warn!(
                task_id = %task.id,
                volume_id = %task.volume_id,
                error = %cause,
                "Provider unavailable, retrying backup next tick"
            );
            return Ok(StartOutcome::Deferred);
        }

        self.fail_task(task, &format!("backup creation failed: {}", cause.message))
            .await?;
        Ok(StartOutcome::Rejected)
    }

    async fn fail_task(&self, task: &QueueTask, reason: &str) -> AppResult<()> {
        tracing::warn!(task_id = %task.id, volume_id = %task.volume_id, reason, "Backup task failed");
        let reason: String = reason.chars().take(MAX_REASON_CHARS).collect();
        self.store
            .update_queue_task(task.id, &QueueTaskUpdate::failed(reason))
            .await?;
        Ok(())
    }

    async fn tasks_with_status(&self, status: QueueTaskStatus) -> AppResult<Vec<QueueTask>> {
        let filter = Filter::all().eq(QueueTaskField::Status, status.as_str());
        self.store.list_queue_tasks(&filter).await
    }
}

#[async_trait]
impl PeriodicEngine for BackupEngine {
    fn name(&self) -> &str {
        "backup"
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
    use blockvault_core::traits::BackupCandidate;
    use blockvault_database::MemoryRecordStore;

    fn settings() -> BackupSettings {
        BackupSettings {
            projects: vec!["p1".into()],
            max_backup_count: 10,
            min_interval_seconds: 0,
            full_backup_depth: 2,
            force_create: true,
            purge_drained_cohorts: false,
        }
    }

    fn candidate(volume: &str) -> BackupCandidate {
        BackupCandidate {
            project_id: "p1".into(),
            volume_id: volume.into(),
            volume_name: volume.into(),
            instance_id: "i1".into(),
            instance_name: "web".into(),
        }
    }

    #[tokio::test]
    async fn test_failed_incremental_is_downgraded() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        cloud.add_candidate(candidate("v1"));
        store
            .create_backup_record(NewBackupRecord {
                backup_id: "b-full".into(),
                project_id: "p1".into(),
                volume_id: "v1".into(),
                instance_id: "i1".into(),
                completed: true,
                incremental: false,
            })
            .await
            .expect("seed record");
        cloud.fail_initiation(
            "v1",
            "Invalid backup: No backups available to do an incremental backup.",
        );

        let engine = BackupEngine::new(store.clone(), cloud.clone(), settings());
        let report = engine.run_once().await.expect("tick");
        assert_eq!(report.seeded, 1);
        assert_eq!(report.deferred, 1);

        let tasks = store.list_queue_tasks(&Filter::all()).await.expect("list");
        assert_eq!(tasks[0].status, QueueTaskStatus::Planned);
        assert!(!tasks[0].incremental);

        cloud.heal_initiation("v1");
        let report = engine.run_once().await.expect("tick");
        assert_eq!(report.initiated, 1);
        let started = store.queue_task(tasks[0].id).expect("task");
        let backup = cloud
            .backup(started.backup_id.as_deref().expect("backup id"))
            .expect("provider backup");
        assert!(!backup.incremental);
    }

    #[tokio::test]
    async fn test_provider_error_fails_task() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        cloud.add_candidate(candidate("v1"));
        let engine = BackupEngine::new(store.clone(), cloud.clone(), settings());

        engine.run_once().await.expect("seed and start");
        let task = store.list_queue_tasks(&Filter::all()).await.expect("list").remove(0);
        let backup_id = task.backup_id.clone().expect("started");
        cloud.set_state(&backup_id, RemoteBackupState::Error);

        let report = engine.run_once().await.expect("poll");
        assert_eq!(report.failed, 1);
        let task = store.queue_task(task.id).expect("task");
        assert_eq!(task.status, QueueTaskStatus::Failed);
        assert!(task.reason.is_some());
        assert_eq!(cloud.initiate_calls(), 1);
        assert_eq!(cloud.delete_calls(), 1);
        assert!(cloud.backup(&backup_id).is_none());
        assert!(store.backup_record_by_backup_id(&backup_id).is_none());
    }

    #[tokio::test]
    async fn test_failed_backup_kept_for_retention_when_delete_refused() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        cloud.add_candidate(candidate("v1"));
        let engine = BackupEngine::new(store.clone(), cloud.clone(), settings());

        engine.run_once().await.expect("seed and start");
        let task = store.list_queue_tasks(&Filter::all()).await.expect("list").remove(0);
        let backup_id = task.backup_id.clone().expect("started");
        cloud.set_state(&backup_id, RemoteBackupState::Error);
        cloud.fail_deletion(&backup_id, "backup is locked");

        let report = engine.run_once().await.expect("poll");
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(
            store.queue_task(task.id).expect("task").status,
            QueueTaskStatus::Failed
        );
        assert!(cloud.backup(&backup_id).is_some());
        assert!(store.backup_record_by_backup_id(&backup_id).is_some());
    }

    #[tokio::test]
    async fn test_permanent_refusal_fails_task() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        cloud.add_candidate(candidate("v1"));
        cloud.fail_initiation("v1", &format!("Volume v1 could not be found.{}", " ".repeat(400)));
        let engine = BackupEngine::new(store.clone(), cloud.clone(), settings());

        let report = engine.run_once().await.expect("tick");
        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 0);

        let task = store.list_queue_tasks(&Filter::all()).await.expect("list").remove(0);
        assert_eq!(task.status, QueueTaskStatus::Failed);
        let reason = task.reason.expect("reason");
        assert!(reason.contains("could not be found"));
        assert!(reason.chars().count() <= 255);

        engine.run_once().await.expect("second tick");
        assert_eq!(cloud.initiate_calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_provider_defers_task() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        cloud.add_candidate(candidate("v1"));
        cloud.throttle_initiation("v1");
        let engine = BackupEngine::new(store.clone(), cloud.clone(), settings());

        let report = engine.run_once().await.expect("tick");
        assert_eq!(report.deferred, 1);
        let task = store.list_queue_tasks(&Filter::all()).await.expect("list").remove(0);
        assert_eq!(task.status, QueueTaskStatus::Planned);

        cloud.heal_initiation("v1");
        let report = engine.run_once().await.expect("tick");
        assert_eq!(report.initiated, 1);
        assert_eq!(
            store.queue_task(task.id).expect("task").status,
            QueueTaskStatus::Wip
        );
    }

    #[tokio::test]
    async fn test_missing_record_is_recreated_on_completion() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        cloud.add_candidate(candidate("v1"));
        let engine = BackupEngine::new(store.clone(), cloud.clone(), settings());

        engine.run_once().await.expect("seed and start");
        let task = store.list_queue_tasks(&Filter::all()).await.expect("list").remove(0);
        let backup_id = task.backup_id.clone().expect("started");
        let record = store.backup_record_by_backup_id(&backup_id).expect("record");
        store.delete_backup_record(record.id).await.expect("lose record");
        cloud.complete_all();

        let report = engine.run_once().await.expect("poll");
        assert_eq!(report.completed, 1);
        let record = store.backup_record_by_backup_id(&backup_id).expect("recreated");
        assert!(record.completed);
    }

    #[tokio::test]
    async fn test_wip_without_backup_id_fails() {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        let mut task = QueueTask::from_new(
            blockvault_entity::NewQueueTask::from_candidate(&candidate("v1"), false),
            Utc::now(),
        );
        task.status = QueueTaskStatus::Wip;
        store.insert_queue_task(task.clone());

        let engine = BackupEngine::new(store.clone(), cloud, settings());
        let report = engine.run_once().await.expect("tick");
        assert_eq!(report.failed, 1);
        assert_eq!(
            store.queue_task(task.id).expect("task").status,
            QueueTaskStatus::Failed
        );
    }
}
