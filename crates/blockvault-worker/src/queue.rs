//! Task queue refresh: seeding one cohort of queue tasks at a time.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing;

use blockvault_core::result::AppResult;
use blockvault_core::traits::{BackupCandidate, CloudBackupClient};
use blockvault_core::types::{Filter, FilterOp};
use blockvault_database::RecordStore;
use blockvault_entity::{BackupRecordField, NewQueueTask};

/// Seeds and retires cohorts of queue tasks.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    /// Record store holding the tasks
    store: Arc<dyn RecordStore>,
    /// Provider used for candidate discovery
    cloud: Arc<dyn CloudBackupClient>,
    /// Projects scanned for candidates
    projects: Vec<String>,
    /// Volumes backed up more recently than this are skipped
    min_interval: Duration,
    /// Recent backups inspected when choosing incremental mode
    full_backup_depth: u32,
}

impl TaskQueue {
    /// Create a new task queue
    pub fn new(
        store: Arc<dyn RecordStore>,
        cloud: Arc<dyn CloudBackupClient>,
        projects: Vec<String>,
    ) -> Self {
        Self {
            store,
            cloud,
            projects,
            min_interval: Duration::zero(),
            full_backup_depth: 0,
        }
    }

    /// Skip volumes with a backup newer than `seconds` (0 disables)
    pub fn with_min_interval(mut self, seconds: u64) -> Self {
        self.min_interval = i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        self
    }

    /// Request incremental backups while one of the last `depth` backups
    /// of a volume is full (0 always requests full backups)
    pub fn with_full_backup_depth(mut self, depth: u32) -> Self {
        self.full_backup_depth = depth;
        self
    }

    /// Seed a new cohort when no queue task exists.
    ///
    /// Any existing task, whatever its status, means the previous cohort
    /// is still draining and the refresh does nothing. Returns the number
    /// of tasks created.
    pub async fn refresh(&self) -> AppResult<usize> {
        let existing = self.store.list_queue_tasks(&Filter::all()).await?;
        if !existing.is_empty() {
            tracing::debug!(
                "Queue refresh skipped: {} tasks of the previous cohort remain",
                existing.len()
            );
            return Ok(0);
        }

        let candidates = self.cloud.list_backup_candidates(&self.projects).await?;
        let mut seen = HashSet::new();
        let mut created = 0;

        for candidate in candidates {
            if !seen.insert(candidate.volume_id.clone()) {
                continue;
            }
            if self.backed_up_recently(&candidate).await? {
                tracing::info!(
                    volume_id = %candidate.volume_id,
                    "Volume backed up within the minimum interval, skipping"
                );
                continue;
            }

            let incremental = self.should_be_incremental(&candidate.volume_id).await?;
            let task = self
                .store
                .create_queue_task(NewQueueTask::from_candidate(&candidate, incremental))
                .await?;
            tracing::debug!(
                task_id = %task.id,
                volume_id = %task.volume_id,
                incremental,
                "Planned backup"
            );
            created += 1;
        }

        tracing::info!("Queue refresh planned {} backups", created);
        Ok(created)
    }

    /// Delete the current cohort once every task in it is terminal.
    ///
    /// Returns the number of tasks deleted; zero when the queue is empty or
    /// still has planned or in-progress work.
    pub async fn purge_drained(&self) -> AppResult<usize> {
        let tasks = self.store.list_queue_tasks(&Filter::all()).await?;
        if tasks.is_empty() || tasks.iter().any(|t| !t.status.is_terminal()) {
            return Ok(0);
        }

        for task in &tasks {
            self.store.delete_queue_task(task.id).await?;
        }
        tracing::info!("Purged drained cohort of {} tasks", tasks.len());
        Ok(tasks.len())
    }

    async fn backed_up_recently(&self, candidate: &BackupCandidate) -> AppResult<bool> {
        if self.min_interval <= Duration::zero() {
            return Ok(false);
        }
        let mut filter = Filter::all().eq(BackupRecordField::VolumeId, candidate.volume_id.as_str());
        if let Some(since) = Utc::now().checked_sub_signed(self.min_interval) {
            filter = filter.and(BackupRecordField::CreatedAt, FilterOp::Gt, since);
        }
        Ok(self.store.count_backup_records(&filter).await? > 0)
    }

    /// Incremental iff one of the volume's last `full_backup_depth`
    /// backups is a full backup.
    async fn should_be_incremental(&self, volume_id: &str) -> AppResult<bool> {
        if self.full_backup_depth == 0 {
            return Ok(false);
        }
        let filter = Filter::all().eq(BackupRecordField::VolumeId, volume_id);
        let records = self.store.list_backup_records(&filter).await?;
        Ok(records
            .iter()
            .rev()
            .take(self.full_backup_depth as usize)
            .any(|r| !r.incremental))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockvault_cloud::FakeCloudClient;
    use blockvault_database::MemoryRecordStore;
    use blockvault_entity::{BackupRecord, NewBackupRecord, QueueTaskStatus, QueueTaskUpdate};

    fn candidate(volume: &str) -> BackupCandidate {
        BackupCandidate {
            project_id: "p1".into(),
            volume_id: volume.into(),
            volume_name: format!("{volume}-data"),
            instance_id: "i1".into(),
            instance_name: "web".into(),
        }
    }

    fn record(volume: &str, backup_id: &str, incremental: bool, age: Duration) -> BackupRecord {
        BackupRecord::from_new(
            NewBackupRecord {
                backup_id: backup_id.into(),
                project_id: "p1".into(),
                volume_id: volume.into(),
                instance_id: "i1".into(),
                completed: true,
                incremental,
            },
            Utc::now() - age,
        )
    }

    fn setup() -> (Arc<MemoryRecordStore>, Arc<FakeCloudClient>) {
        let store = Arc::new(MemoryRecordStore::new());
        let cloud = Arc::new(FakeCloudClient::new());
        cloud.add_candidate(candidate("v1"));
        cloud.add_candidate(candidate("v2"));
        (store, cloud)
    }

    #[tokio::test]
    async fn test_refresh_seeds_empty_queue() {
        let (store, cloud) = setup();
        let queue = TaskQueue::new(store.clone(), cloud, vec!["p1".into()]);

        assert_eq!(queue.refresh().await.expect("refresh"), 2);
        let tasks = store.list_queue_tasks(&Filter::all()).await.expect("list");
        assert!(tasks.iter().all(|t| t.status == QueueTaskStatus::Planned));
    }

    #[tokio::test]
    async fn test_refresh_is_noop_while_tasks_exist() {
        let (store, cloud) = setup();
        let queue = TaskQueue::new(store.clone(), cloud.clone(), vec!["p1".into()]);
        queue.refresh().await.expect("first");

        cloud.add_candidate(candidate("v3"));
        assert_eq!(queue.refresh().await.expect("second"), 0);
        assert_eq!(queue.refresh().await.expect("third"), 0);
        assert_eq!(
            store.list_queue_tasks(&Filter::all()).await.expect("list").len(),
            2
        );
    }

    #[tokio::test]
    async fn test_min_interval_skips_recent_volumes() {
        let (store, cloud) = setup();
        store.insert_backup_record(record("v1", "b-recent", false, Duration::minutes(10)));
        store.insert_backup_record(record("v2", "b-old", false, Duration::days(2)));
        let queue = TaskQueue::new(store.clone(), cloud, vec!["p1".into()]).with_min_interval(3600);

        assert_eq!(queue.refresh().await.expect("refresh"), 1);
        let tasks = store.list_queue_tasks(&Filter::all()).await.expect("list");
        assert_eq!(tasks[0].volume_id, "v2");
    }

    #[tokio::test]
    async fn test_incremental_selection() {
        let (store, cloud) = setup();
        // v1: full, then two incrementals; depth 2 sees only incrementals.
        store.insert_backup_record(record("v1", "b1", false, Duration::days(3)));
        store.insert_backup_record(record("v1", "b2", true, Duration::days(2)));
        store.insert_backup_record(record("v1", "b3", true, Duration::days(1)));
        // v2: a recent full backup.
        store.insert_backup_record(record("v2", "b4", false, Duration::days(1)));
        let queue = TaskQueue::new(store.clone(), cloud, vec!["p1".into()]).with_full_backup_depth(2);

        queue.refresh().await.expect("refresh");
        let tasks = store.list_queue_tasks(&Filter::all()).await.expect("list");
        let mode = |volume: &str| {
            tasks
                .iter()
                .find(|t| t.volume_id == volume)
                .map(|t| t.incremental)
        };
        assert_eq!(mode("v1"), Some(false));
        assert_eq!(mode("v2"), Some(true));
    }

    #[tokio::test]
    async fn test_purge_only_drained_cohorts() {
        let (store, cloud) = setup();
        let queue = TaskQueue::new(store.clone(), cloud, vec!["p1".into()]);
        queue.refresh().await.expect("refresh");

        let tasks = store.list_queue_tasks(&Filter::all()).await.expect("list");
        store
            .update_queue_task(tasks[0].id, &QueueTaskUpdate::failed("volume gone"))
            .await
            .expect("fail");
        assert_eq!(queue.purge_drained().await.expect("purge"), 0);

        store
            .update_queue_task(tasks[1].id, &QueueTaskUpdate::failed("volume gone"))
            .await
            .expect("fail");
        assert_eq!(queue.purge_drained().await.expect("purge"), 2);
        assert_eq!(queue.refresh().await.expect("refresh"), 2);
    }
}
