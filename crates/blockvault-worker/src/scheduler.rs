//! Conductor: supervises one runner per engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing;

use crate::executor::PeriodicEngine;
use crate::runner::EngineRunner;

/// Owns the engine runners and the shutdown signal they share.
pub struct Conductor {
    /// Shutdown signal observed by every runner
    shutdown_tx: watch::Sender<bool>,
    /// Spawned runners by engine name
    runners: Vec<(String, JoinHandle<()>)>,
}

impl std::fmt::Debug for Conductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conductor")
            .field(
                "engines",
                &self.runners.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Conductor {
    /// Create a conductor with no engines
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            runners: Vec::new(),
        }
    }

    /// Start ticking `engine` every `period`
    pub fn spawn(&mut self, engine: Arc<dyn PeriodicEngine>, period: Duration) {
        let name = engine.name().to_string();
        let runner = EngineRunner::new(engine, period);
        let cancel = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move { runner.run(cancel).await });

        tracing::info!("Scheduled engine '{}' every {}s", name, period.as_secs());
        self.runners.push((name, handle));
    }

    /// Number of supervised engines
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    /// Whether no engine is supervised
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Stop scheduling ticks and wait up to `grace` for in-flight ticks.
    ///
    /// Runners still busy when the grace period ends are aborted. Returns
    /// `true` when every runner finished on its own.
    pub async fn shutdown(self, grace: Duration) -> bool {
        tracing::info!(
            "Conductor shutting down, waiting up to {}s for in-flight ticks",
            grace.as_secs()
        );
        let _ = self.shutdown_tx.send(true);

        let deadline = Instant::now() + grace;
        let mut drained = true;

        for (name, mut handle) in self.runners {
            match time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Engine '{}' runner ended abnormally: {}", name, e);
                    drained = false;
                }
                Err(_) => {
                    tracing::warn!("Engine '{}' did not finish within the grace period, aborting", name);
                    handle.abort();
                    drained = false;
                }
            }
        }

        tracing::info!("Conductor shut down complete");
        drained
    }
}

impl Default for Conductor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::executor::TickError;

    #[derive(Debug)]
    struct Slow {
        name: &'static str,
        duration: Duration,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicEngine for Slow {
        fn name(&self) -> &str {
            self.name
        }

        async fn tick(&self) -> Result<Value, TickError> {
            time::sleep(self.duration).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    fn slow(name: &'static str, secs: u64) -> Arc<Slow> {
        Arc::new(Slow {
            name,
            duration: Duration::from_secs(secs),
            finished: AtomicUsize::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_in_flight_tick() {
        let engine = slow("backup", 20);
        let mut conductor = Conductor::new();
        conductor.spawn(engine.clone(), Duration::from_secs(60));

        time::sleep(Duration::from_secs(5)).await;
        assert!(conductor.shutdown(Duration::from_secs(30)).await);
        assert_eq!(engine.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_after_grace() {
        let engine = slow("retention", 120);
        let mut conductor = Conductor::new();
        conductor.spawn(engine.clone(), Duration::from_secs(60));

        time::sleep(Duration::from_secs(1)).await;
        assert!(!conductor.shutdown(Duration::from_secs(10)).await);
        assert_eq!(engine.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engines_run_independently() {
        let fast = slow("backup", 1);
        let slower = slow("retention", 1);
        let mut conductor = Conductor::new();
        conductor.spawn(fast.clone(), Duration::from_secs(9));
        conductor.spawn(slower.clone(), Duration::from_secs(29));
        assert_eq!(conductor.len(), 2);

        // Ticks end at 1, 11, 21, 31 and 1, 31 respectively.
        time::sleep(Duration::from_secs(35)).await;
        assert!(conductor.shutdown(Duration::from_secs(5)).await);
        assert_eq!(fast.finished.load(Ordering::SeqCst), 4);
        assert_eq!(slower.finished.load(Ordering::SeqCst), 2);
    }
}
