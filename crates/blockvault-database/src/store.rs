//! The record store the engines are written against.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use blockvault_core::config::{DatabaseConfig, StoreConfig, StoreProvider};
use blockvault_core::result::AppResult;
use blockvault_core::types::Filter;
use blockvault_core::types::id::{BackupRecordId, QueueTaskId};
use blockvault_entity::{
    BackupRecord, BackupRecordField, BackupRecordUpdate, NewBackupRecord, NewQueueTask, QueueTask,
    QueueTaskField, QueueTaskUpdate,
};

use crate::connection::DatabasePool;
use crate::memory::MemoryRecordStore;
use crate::migration::run_migrations;
use crate::postgres::PgRecordStore;

/// Durable keyed storage for queue tasks and backup records.
///
/// Implementations must give read-your-writes consistency to a single
/// caller and must refuse queue task status regressions with
/// `ErrorKind::Conflict`, leaving the stored task untouched. Updates and
/// deletes of unknown keys fail with `ErrorKind::NotFound`.
#[async_trait]
pub trait RecordStore: Send + Sync + fmt::Debug + 'static {
    /// Persist a new PLANNED queue task.
    async fn create_queue_task(&self, data: NewQueueTask) -> AppResult<QueueTask>;

    /// Apply a partial update to a queue task.
    async fn update_queue_task(
        &self,
        id: QueueTaskId,
        update: &QueueTaskUpdate,
    ) -> AppResult<QueueTask>;

    /// List queue tasks matching `filter`, oldest first.
    async fn list_queue_tasks(&self, filter: &Filter<QueueTaskField>) -> AppResult<Vec<QueueTask>>;

    /// Delete one queue task.
    async fn delete_queue_task(&self, id: QueueTaskId) -> AppResult<()>;

    /// Persist a new backup record.
    async fn create_backup_record(&self, data: NewBackupRecord) -> AppResult<BackupRecord>;

    /// Apply a partial update to a backup record.
    async fn update_backup_record(
        &self,
        id: BackupRecordId,
        update: &BackupRecordUpdate,
    ) -> AppResult<BackupRecord>;

    /// List backup records matching `filter`, oldest first.
    async fn list_backup_records(
        &self,
        filter: &Filter<BackupRecordField>,
    ) -> AppResult<Vec<BackupRecord>>;

    /// Count backup records matching `filter`.
    async fn count_backup_records(&self, filter: &Filter<BackupRecordField>) -> AppResult<u64>;

    /// Delete one backup record.
    async fn delete_backup_record(&self, id: BackupRecordId) -> AppResult<()>;
}

/// Open the store selected by `store`, connecting and migrating the
/// database when PostgreSQL is configured.
pub async fn open_store(
    store: &StoreConfig,
    database: &DatabaseConfig,
) -> AppResult<Arc<dyn RecordStore>> {
    match store.provider {
        StoreProvider::Postgres => {
            let pool = DatabasePool::connect(database).await?;
            run_migrations(pool.pool()).await?;
            Ok(Arc::new(PgRecordStore::new(pool.pool().clone())))
        }
        StoreProvider::Memory => {
            warn!("Using the in-memory record store; state is lost on exit");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
    }
}
