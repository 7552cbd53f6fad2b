//! The contract between engines and the runner that ticks them.

use async_trait::async_trait;
use serde_json::Value;

use blockvault_core::error::AppError;

/// An engine ticked periodically by an [`EngineRunner`](crate::EngineRunner).
#[async_trait]
pub trait PeriodicEngine: Send + Sync + std::fmt::Debug {
    /// Engine name used in logs.
    fn name(&self) -> &str;

    /// Run one tick to completion and return its report.
    async fn tick(&self) -> Result<Value, TickError>;
}

/// Reason a tick ended early.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The tick was skipped without mutating state
    #[error("Tick aborted: {0}")]
    Aborted(String),

    /// The store or another dependency failed outside per-item handling
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}
