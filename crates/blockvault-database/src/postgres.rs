//! PostgreSQL-backed [`RecordStore`].

use async_trait::async_trait;
use sqlx::PgPool;

use blockvault_core::result::AppResult;
use blockvault_core::types::Filter;
use blockvault_core::types::id::{BackupRecordId, QueueTaskId};
use blockvault_entity::{
    BackupRecord, BackupRecordField, BackupRecordUpdate, NewBackupRecord, NewQueueTask, QueueTask,
    QueueTaskField, QueueTaskUpdate,
};

use crate::repositories::{BackupRecordRepository, QueueTaskRepository};
use crate::store::RecordStore;

/// Record store over the `queue_tasks` and `backup_records` tables.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    tasks: QueueTaskRepository,
    records: BackupRecordRepository,
}

impl PgRecordStore {
    /// Create a store sharing `pool` between both repositories.
    pub fn new(pool: PgPool) -> Self {
        Self {
            tasks: QueueTaskRepository::new(pool.clone()),
            records: BackupRecordRepository::new(pool),
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_queue_task(&self, data: NewQueueTask) -> AppResult<QueueTask> {
        self.tasks.create(data).await
    }

    async fn update_queue_task(
        &self,
        id: QueueTaskId,
        update: &QueueTaskUpdate,
    ) -> AppResult<QueueTask> {
        self.tasks.update(id, update).await
    }

    async fn list_queue_tasks(&self, filter: &Filter<QueueTaskField>) -> AppResult<Vec<QueueTask>> {
        self.tasks.find_all(filter).await
    }

    async fn delete_queue_task(&self, id: QueueTaskId) -> AppResult<()> {
        self.tasks.delete(id).await
    }

    async fn create_backup_record(&self, data: NewBackupRecord) -> AppResult<BackupRecord> {
        self.records.create(data).await
    }

    async fn update_backup_record(
        &self,
        id: BackupRecordId,
        update: &BackupRecordUpdate,
    ) -> AppResult<BackupRecord> {
        self.records.update(id, update).await
    }

    async fn list_backup_records(
        &self,
        filter: &Filter<BackupRecordField>,
    ) -> AppResult<Vec<BackupRecord>> {
        self.records.find_all(filter).await
    }

    async fn count_backup_records(&self, filter: &Filter<BackupRecordField>) -> AppResult<u64> {
        self.records.count(filter).await
    }

    async fn delete_backup_record(&self, id: BackupRecordId) -> AppResult<()> {
        self.records.delete(id).await
    }
}
