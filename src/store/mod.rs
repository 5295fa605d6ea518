//! Persistence boundary for snapshots, alerts and integration health
//!
//! The engine only talks to the [`Store`] trait. [`MemoryStore`] is the
//! in-process adapter used by the server binary and by tests.

pub mod memory;
pub mod records;
pub mod retention;

use async_trait::async_trait;

use crate::snapshot::{MetricSnapshot, SnapshotType};

pub use memory::MemoryStore;
pub use records::{
    Alert, AlertSeverity, AlertStatus, AlertStatusUpdate, IntegrationHealthRecord,
    IntegrationStatus, NewAlert,
};
pub use retention::{RetentionConfig, RetentionWorker};

#[async_trait]
pub trait Store: Send + Sync {
    /// Append a snapshot to its type's log
    async fn insert_snapshot(&self, snapshot: MetricSnapshot) -> Result<(), StoreError>;

    /// Snapshots of `snapshot_type` collected at or after `since`, oldest first
    async fn select_snapshots(
        &self,
        snapshot_type: SnapshotType,
        since: i64,
    ) -> Result<Vec<MetricSnapshot>, StoreError>;

    /// Up to `limit` most recent snapshots of a type, newest first
    async fn recent_snapshots(
        &self,
        snapshot_type: SnapshotType,
        limit: usize,
    ) -> Result<Vec<MetricSnapshot>, StoreError>;

    /// Collection time of the newest snapshot of any type
    async fn newest_collection_time(&self) -> Result<Option<i64>, StoreError>;

    /// Insert a new open alert. Fails with `Conflict` when the metric
    /// already has an open alert.
    async fn insert_alert(&self, alert: NewAlert) -> Result<Alert, StoreError>;

    /// Overwrite an existing alert row
    async fn update_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    async fn select_alert(&self, id: u64) -> Result<Option<Alert>, StoreError>;

    /// The open (non-resolved) alert for a metric, if any
    async fn select_active_alert_by_metric(
        &self,
        metric_name: &str,
    ) -> Result<Option<Alert>, StoreError>;

    /// All alerts, optionally filtered by stored status, newest first
    async fn select_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>, StoreError>;

    /// Alerts resolved at or after `since`
    async fn select_resolved_since(&self, since: i64) -> Result<Vec<Alert>, StoreError>;

    async fn update_alert_status(
        &self,
        id: u64,
        update: AlertStatusUpdate,
    ) -> Result<Option<Alert>, StoreError>;

    async fn upsert_integration_health(
        &self,
        record: IntegrationHealthRecord,
    ) -> Result<(), StoreError>;

    async fn select_integration_health(&self) -> Result<Vec<IntegrationHealthRecord>, StoreError>;

    /// Drop snapshots collected before `before`; returns how many
    async fn prune_snapshots(&self, before: i64) -> Result<usize, StoreError>;

    /// Drop alerts resolved before `before`; returns how many
    async fn prune_resolved_alerts(&self, before: i64) -> Result<usize, StoreError>;
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Alert {0} not found")]
    AlertNotFound(u64),

    #[error("Conflict: {0}")]
    Conflict(String),
}
