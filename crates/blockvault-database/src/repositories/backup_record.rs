//! Backup record repository implementation.

use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};

use blockvault_core::error::{AppError, ErrorKind};
use blockvault_core::result::AppResult;
use blockvault_core::types::Filter;
use blockvault_core::types::id::BackupRecordId;
use blockvault_entity::{BackupRecord, BackupRecordField, BackupRecordUpdate, NewBackupRecord};

use super::{map_write_error, push_filter};

/// Repository for backup record CRUD.
#[derive(Debug, Clone)]
pub struct BackupRecordRepository {
    pool: PgPool,
}

impl BackupRecordRepository {
    /// Create a new backup record repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List backup records matching a filter, oldest first.
    pub async fn find_all(&self, filter: &Filter<BackupRecordField>) -> AppResult<Vec<BackupRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM backup_records");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at ASC, id ASC");

        qb.build_query_as::<BackupRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to list backup records", e)
            })
    }

    /// Count backup records matching a filter.
    pub async fn count(&self, filter: &Filter<BackupRecordField>) -> AppResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM backup_records");
        push_filter(&mut qb, filter);

        let total: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to count backup records", e)
            })?;
        Ok(total.max(0) as u64)
    }

    /// Create a new backup record. A duplicate provider backup id is a
    /// conflict.
    pub async fn create(&self, data: NewBackupRecord) -> AppResult<BackupRecord> {
        let record = BackupRecord::from_new(data, Utc::now());

        sqlx::query_as::<_, BackupRecord>(
            "INSERT INTO backup_records (id, backup_id, project_id, volume_id, instance_id, \
             completed, incremental, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(record.id)
        .bind(&record.backup_id)
        .bind(&record.project_id)
        .bind(&record.volume_id)
        .bind(&record.instance_id)
        .bind(record.completed)
        .bind(record.incremental)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error("Failed to create backup record", e))
    }

    /// Apply a partial update.
    pub async fn update(
        &self,
        id: BackupRecordId,
        update: &BackupRecordUpdate,
    ) -> AppResult<BackupRecord> {
        sqlx::query_as::<_, BackupRecord>(
            "UPDATE backup_records SET completed = COALESCE($2, completed), updated_at = $3 \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(update.completed)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to update backup record", e))?
        .ok_or_else(|| AppError::not_found(format!("Backup record {id} not found")))
    }

    /// Delete a backup record.
    pub async fn delete(&self, id: BackupRecordId) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM backup_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to delete backup record", e)
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Backup record {id} not found")));
        }
        Ok(())
    }
}
