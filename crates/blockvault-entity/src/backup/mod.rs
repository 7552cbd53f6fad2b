//! Backup record domain entities.

pub mod model;

pub use model::{BackupRecord, BackupRecordField, BackupRecordUpdate, NewBackupRecord};
