//! Queue task repository implementation.

use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};

use blockvault_core::error::{AppError, ErrorKind};
use blockvault_core::result::AppResult;
use blockvault_core::types::Filter;
use blockvault_core::types::id::QueueTaskId;
use blockvault_entity::{NewQueueTask, QueueTask, QueueTaskField, QueueTaskUpdate};

use super::{map_write_error, push_filter};

/// Repository for queue task CRUD.
#[derive(Debug, Clone)]
pub struct QueueTaskRepository {
    pool: PgPool,
}

impl QueueTaskRepository {
    /// Create a new queue task repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a queue task by ID.
    pub async fn find_by_id(&self, id: QueueTaskId) -> AppResult<Option<QueueTask>> {
        sqlx::query_as::<_, QueueTask>("SELECT * FROM queue_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find queue task", e))
    }

    /// List queue tasks matching a filter, oldest first.
    pub async fn find_all(&self, filter: &Filter<QueueTaskField>) -> AppResult<Vec<QueueTask>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM queue_tasks");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at ASC, id ASC");

        qb.build_query_as::<QueueTask>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list queue tasks", e))
    }

    /// Create a new PLANNED queue task.
    pub async fn create(&self, data: NewQueueTask) -> AppResult<QueueTask> {
        let task = QueueTask::from_new(data, Utc::now());

        sqlx::query_as::<_, QueueTask>(
            "INSERT INTO queue_tasks (id, project_id, volume_id, volume_name, instance_id, \
             instance_name, backup_id, status, incremental, reason, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING *",
        )
        .bind(task.id)
        .bind(&task.project_id)
        .bind(&task.volume_id)
        .bind(&task.volume_name)
        .bind(&task.instance_id)
        .bind(&task.instance_name)
        .bind(&task.backup_id)
        .bind(task.status)
        .bind(task.incremental)
        .bind(&task.reason)
        .bind(task.created_at)
        .bind(task.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error("Failed to create queue task", e))
    }

    /// Apply a partial update under a row lock.
    ///
    /// The stored row is locked, the update validated against it in Rust,
    /// and only then written, so a rejected status regression leaves the
    /// row untouched.
    pub async fn update(&self, id: QueueTaskId, update: &QueueTaskUpdate) -> AppResult<QueueTask> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })?;

        let mut task =
            sqlx::query_as::<_, QueueTask>("SELECT * FROM queue_tasks WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to lock queue task", e)
                })?
                .ok_or_else(|| AppError::not_found(format!("Queue task {id} not found")))?;

        update.apply(&mut task, Utc::now())?;

        let task = sqlx::query_as::<_, QueueTask>(
            "UPDATE queue_tasks SET status = $2, backup_id = $3, incremental = $4, reason = $5, \
             updated_at = $6 WHERE id = $1 RETURNING *",
        )
        .bind(task.id)
        .bind(task.status)
        .bind(&task.backup_id)
        .bind(task.incremental)
        .bind(&task.reason)
        .bind(task.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to update queue task", e))?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit queue task update", e)
        })?;

        Ok(task)
    }

    /// Delete a queue task.
    pub async fn delete(&self, id: QueueTaskId) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM queue_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to delete queue task", e)
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Queue task {id} not found")));
        }
        Ok(())
    }
}
