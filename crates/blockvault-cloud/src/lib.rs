//! # blockvault-cloud
//!
//! Implementations of [`CloudBackupClient`]: an OpenStack-style REST
//! client whose every call runs under an explicit [`RetryPolicy`], and an
//! in-memory [`FakeCloudClient`] for tests and dry runs.

pub mod error;
pub mod fake;
pub mod models;
pub mod openstack;
pub mod retry;

use std::sync::Arc;

use tracing::warn;

use blockvault_core::config::{CloudConfig, CloudProvider};
use blockvault_core::result::AppResult;
use blockvault_core::traits::CloudBackupClient;

pub use error::CloudError;
pub use fake::FakeCloudClient;
pub use openstack::OpenStackClient;
pub use retry::RetryPolicy;

/// Build the client selected by `config.provider`.
pub fn build_client(config: &CloudConfig) -> AppResult<Arc<dyn CloudBackupClient>> {
    match config.provider {
        CloudProvider::OpenStack => {
            if config.projects.is_empty() {
                warn!("cloud.projects is empty; no volume will be discovered");
            }
            Ok(Arc::new(OpenStackClient::new(config)?))
        }
        CloudProvider::Fake => {
            warn!("Using the fake cloud client; no real backups will be taken");
            Ok(Arc::new(FakeCloudClient::auto_completing()))
        }
    }
}
