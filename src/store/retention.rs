use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use super::{Store, StoreError};
use crate::clock::{Clock, HOUR_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    pub interval: Duration,
    /// Snapshots older than this are pruned
    pub snapshot_retention_ms: i64,
    /// Resolved alerts older than this are pruned
    pub resolved_alert_retention_ms: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            snapshot_retention_ms: 24 * HOUR_MS,
            resolved_alert_retention_ms: 7 * 24 * HOUR_MS,
        }
    }
}

/// Retention worker that periodically prunes old snapshots and resolved alerts
pub struct RetentionWorker {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: RetentionConfig,
    running: Arc<AtomicBool>,
}

impl RetentionWorker {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: RetentionConfig) -> Self {
        Self {
            store,
            clock,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Retention worker started with interval {:?}", self.config.interval);

            let mut interval = time::interval(self.config.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                match self.run_once().await {
                    Ok((snapshots, alerts)) if snapshots + alerts > 0 => {
                        tracing::info!(snapshots, alerts, "Retention worker pruned rows");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Retention pass failed"),
                }
            }

            tracing::info!("Retention worker stopped");
        })
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one pruning pass; returns (snapshots, alerts) removed
    pub async fn run_once(&self) -> Result<(usize, usize), StoreError> {
        let now = self.clock.now_ms();
        let snapshots = self
            .store
            .prune_snapshots(now - self.config.snapshot_retention_ms)
            .await?;
        let alerts = self
            .store
            .prune_resolved_alerts(now - self.config.resolved_alert_retention_ms)
            .await?;
        Ok((snapshots, alerts))
    }
}
