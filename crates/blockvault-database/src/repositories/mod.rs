//! sqlx repositories for the two record kinds.

pub mod backup_record;
pub mod queue_task;

pub use backup_record::BackupRecordRepository;
pub use queue_task::QueueTaskRepository;

use sqlx::{Postgres, QueryBuilder};

use blockvault_core::error::{AppError, ErrorKind};
use blockvault_core::types::{Filter, FilterField, FilterValue};

/// Append `filter` as a `WHERE` clause with bound operands.
pub(crate) fn push_filter<F: FilterField>(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter<F>) {
    for (i, condition) in filter.conditions().iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        qb.push(condition.field.column());
        qb.push(" ");
        qb.push(condition.op.sql());
        qb.push(" ");
        match &condition.value {
            FilterValue::Uuid(v) => {
                qb.push_bind(*v);
            }
            FilterValue::Timestamp(v) => {
                qb.push_bind(*v);
            }
            FilterValue::Boolean(v) => {
                qb.push_bind(*v);
            }
            FilterValue::Integer(v) => {
                qb.push_bind(*v);
            }
            FilterValue::String(v) => {
                qb.push_bind(v.clone());
            }
        }
    }
}

/// Map a sqlx error, turning unique violations into conflicts.
pub(crate) fn map_write_error(message: &str, err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return AppError::conflict(format!("{message}: {}", db.message()));
        }
    }
    AppError::with_source(ErrorKind::Database, message.to_string(), err)
}
