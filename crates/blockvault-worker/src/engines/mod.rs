//! The two periodic engines.

pub mod backup;
pub mod retention;

pub use backup::{BackupEngine, BackupSettings, BackupTickReport};
pub use retention::{RetentionEngine, RetentionTickReport};
