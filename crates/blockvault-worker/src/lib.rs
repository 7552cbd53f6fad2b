//! Backup orchestration engines and their periodic scheduling.
//!
//! This crate provides:
//! - The quota gate and the task queue refresh
//! - The backup creation engine driving queue tasks to completion
//! - The retention engine expiring old backups
//! - A serial runner per engine and a conductor supervising both

pub mod engines;
pub mod executor;
pub mod queue;
pub mod quota;
pub mod runner;
pub mod scheduler;

pub use engines::{BackupEngine, BackupSettings, BackupTickReport, RetentionEngine, RetentionTickReport};
pub use executor::{PeriodicEngine, TickError};
pub use queue::TaskQueue;
pub use quota::QuotaGate;
pub use runner::EngineRunner;
pub use scheduler::Conductor;
