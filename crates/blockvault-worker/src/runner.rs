//! Engine runner: ticks one engine serially until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing;

use crate::executor::{PeriodicEngine, TickError};

/// Ticks one engine, sleeping `period` after each finished tick.
///
/// The first tick runs immediately. A tick is never interrupted by
/// shutdown; the runner stops before starting the next one.
#[derive(Debug, Clone)]
pub struct EngineRunner {
    /// The engine to tick
    engine: Arc<dyn PeriodicEngine>,
    /// Spacing between the end of one tick and the start of the next
    period: Duration,
}

impl EngineRunner {
    /// Create a new engine runner
    pub fn new(engine: Arc<dyn PeriodicEngine>, period: Duration) -> Self {
        Self { engine, period }
    }

    /// Run until the cancel signal turns true or its sender is dropped
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        tracing::info!(
            "Engine '{}' started with period={}s",
            self.engine.name(),
            self.period.as_secs()
        );

        while !*cancel.borrow() {
            self.tick_once().await;

            if !wait_or_cancel(self.period, &mut cancel).await {
                break;
            }
        }

        tracing::info!("Engine '{}' stopped", self.engine.name());
    }

    /// Run a single tick and log its outcome
    pub async fn tick_once(&self) {
        let name = self.engine.name();
        let started = Instant::now();

        match self.engine.tick().await {
            Ok(report) => {
                tracing::info!(
                    engine = name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    report = %report,
                    "Tick finished"
                );
            }
            Err(TickError::Aborted(reason)) => {
                tracing::warn!(engine = name, "Tick skipped: {}", reason);
            }
            Err(TickError::Internal(err)) => {
                tracing::error!(engine = name, "Tick failed: {}", err);
            }
        }
    }
}

/// Sleep for `period` unless cancelled first. Returns `false` on cancel.
async fn wait_or_cancel(period: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    let sleep = time::sleep(period);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return false;
                }
            }
        }
    }
}
