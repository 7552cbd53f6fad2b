//! Process-local [`RecordStore`] backed by concurrent hash maps.
//!
//! Semantics match [`PgRecordStore`](crate::PgRecordStore): listings are
//! ordered by creation time, status regressions are conflicts, and a
//! duplicate provider backup id is rejected.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use blockvault_core::error::AppError;
use blockvault_core::result::AppResult;
use blockvault_core::types::Filter;
use blockvault_core::types::id::{BackupRecordId, QueueTaskId};
use blockvault_entity::{
    BackupRecord, BackupRecordField, BackupRecordUpdate, NewBackupRecord, NewQueueTask, QueueTask,
    QueueTaskField, QueueTaskUpdate,
};

use crate::store::RecordStore;

/// In-memory record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tasks: DashMap<QueueTaskId, QueueTask>,
    records: DashMap<BackupRecordId, BackupRecord>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed task, replacing any task with the same id.
    pub fn insert_queue_task(&self, task: QueueTask) {
        self.tasks.insert(task.id, task);
    }

    /// Insert a fully-formed record, replacing any record with the same id.
    pub fn insert_backup_record(&self, record: BackupRecord) {
        self.records.insert(record.id, record);
    }

    /// Look up a task by id.
    pub fn queue_task(&self, id: QueueTaskId) -> Option<QueueTask> {
        self.tasks.get(&id).map(|t| t.value().clone())
    }

    /// Look up a record by provider backup id.
    pub fn backup_record_by_backup_id(&self, backup_id: &str) -> Option<BackupRecord> {
        self.records
            .iter()
            .find(|r| r.backup_id == backup_id)
            .map(|r| r.value().clone())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_queue_task(&self, data: NewQueueTask) -> AppResult<QueueTask> {
        let task = QueueTask::from_new(data, Utc::now());
        if self.tasks.contains_key(&task.id) {
            return Err(AppError::conflict(format!(
                "Queue task {} already exists",
                task.id
            )));
        }
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn update_queue_task(
        &self,
        id: QueueTaskId,
        update: &QueueTaskUpdate,
    ) -> AppResult<QueueTask> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Queue task {id} not found")))?;
        let mut task = entry.value().clone();
        update.apply(&mut task, Utc::now())?;
        *entry.value_mut() = task.clone();
        Ok(task)
    }

    async fn list_queue_tasks(&self, filter: &Filter<QueueTaskField>) -> AppResult<Vec<QueueTask>> {
        let mut tasks: Vec<QueueTask> = self
            .tasks
            .iter()
            .filter(|t| filter.matches(t.value()))
            .map(|t| t.value().clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(tasks)
    }

    async fn delete_queue_task(&self, id: QueueTaskId) -> AppResult<()> {
        self.tasks
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(format!("Queue task {id} not found")))
    }

    async fn create_backup_record(&self, data: NewBackupRecord) -> AppResult<BackupRecord> {
        if self.records.iter().any(|r| r.backup_id == data.backup_id) {
            return Err(AppError::conflict(format!(
                "Backup record for backup {} already exists",
                data.backup_id
            )));
        }
        let record = BackupRecord::from_new(data, Utc::now());
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_backup_record(
        &self,
        id: BackupRecordId,
        update: &BackupRecordUpdate,
    ) -> AppResult<BackupRecord> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Backup record {id} not found")))?;
        update.apply(entry.value_mut(), Utc::now());
        Ok(entry.value().clone())
    }

    async fn list_backup_records(
        &self,
        filter: &Filter<BackupRecordField>,
    ) -> AppResult<Vec<BackupRecord>> {
        let mut records: Vec<BackupRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(records)
    }

    async fn count_backup_records(&self, filter: &Filter<BackupRecordField>) -> AppResult<u64> {
        Ok(self.records.iter().filter(|r| filter.matches(r.value())).count() as u64)
    }

    async fn delete_backup_record(&self, id: BackupRecordId) -> AppResult<()> {
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(format!("Backup record {id} not found")))
    }
}
