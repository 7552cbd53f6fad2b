//! Backup count ceiling.

use std::sync::Arc;

use serde::Serialize;

use blockvault_core::result::AppResult;
use blockvault_core::types::Filter;
use blockvault_database::RecordStore;

/// Current backup count against the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    /// Backup records held.
    pub count: u64,
    /// Configured maximum.
    pub max: u64,
}

impl QuotaUsage {
    /// Whether the ceiling is reached.
    pub fn is_over_limit(&self) -> bool {
        self.count >= self.max
    }
}

/// Gates new backups once the number of backup records reaches a maximum.
///
/// Every record counts, completed or not.
#[derive(Debug, Clone)]
pub struct QuotaGate {
    store: Arc<dyn RecordStore>,
    max_backup_count: u64,
}

impl QuotaGate {
    /// Create a gate over `store`.
    pub fn new(store: Arc<dyn RecordStore>, max_backup_count: u64) -> Self {
        Self {
            store,
            max_backup_count,
        }
    }

    /// Count records against the maximum.
    pub async fn usage(&self) -> AppResult<QuotaUsage> {
        let count = self.store.count_backup_records(&Filter::all()).await?;
        Ok(QuotaUsage {
            count,
            max: self.max_backup_count,
        })
    }

    /// Whether no new backup may be started.
    pub async fn is_over_limit(&self) -> AppResult<bool> {
        let usage = self.usage().await?;
        if usage.is_over_limit() {
            tracing::info!(
                count = usage.count,
                max = usage.max,
                "Backup count ceiling reached"
            );
        }
        Ok(usage.is_over_limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockvault_database::MemoryRecordStore;
    use blockvault_entity::NewBackupRecord;

    async fn store_with_records(n: usize) -> Arc<MemoryRecordStore> {
        let store = Arc::new(MemoryRecordStore::new());
        for i in 0..n {
            store
                .create_backup_record(NewBackupRecord {
                    backup_id: format!("b-{i}"),
                    project_id: "p1".into(),
                    volume_id: format!("v{i}"),
                    instance_id: "i1".into(),
                    completed: i % 2 == 0,
                    incremental: false,
                })
                .await
                .expect("create record");
        }
        store
    }

    #[tokio::test]
    async fn test_at_max_is_over_limit() {
        let gate = QuotaGate::new(store_with_records(5).await, 5);
        assert!(gate.is_over_limit().await.expect("count"));
    }

    #[tokio::test]
    async fn test_below_max_is_not_over_limit() {
        let gate = QuotaGate::new(store_with_records(4).await, 5);
        assert!(!gate.is_over_limit().await.expect("count"));
        assert_eq!(
            gate.usage().await.expect("usage"),
            QuotaUsage { count: 4, max: 5 }
        );
    }
}
