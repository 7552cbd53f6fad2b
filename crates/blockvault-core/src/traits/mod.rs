//! Collaborator traits defined in `blockvault-core` and implemented by
//! other crates.

pub mod cloud;

pub use cloud::{
    BackupCandidate, BackupQuota, BackupRequest, CloudBackupClient, RemoteBackupState,
};
