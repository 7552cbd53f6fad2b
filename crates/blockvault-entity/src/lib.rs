//! # blockvault-entity
//!
//! Domain entity models for BlockVault. Every struct in this crate
//! represents a record-store row or the typed payload used to create or
//! update one. Stored entities derive `sqlx::FromRow` and implement
//! [`Filterable`](blockvault_core::types::Filterable) so that the SQL and
//! in-memory stores evaluate the same filters.

pub mod backup;
pub mod queue;

pub use backup::{BackupRecord, BackupRecordField, BackupRecordUpdate, NewBackupRecord};
pub use queue::{NewQueueTask, QueueTask, QueueTaskField, QueueTaskStatus, QueueTaskUpdate};
