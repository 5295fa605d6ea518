use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::records::{Alert, AlertStatus, AlertStatusUpdate, IntegrationHealthRecord, NewAlert};
use super::{Store, StoreError};
use crate::snapshot::{MetricSnapshot, SnapshotType};

/// Per-type cap on retained snapshots, independent of time-based pruning.
/// A day of one-minute ticks fits comfortably.
const DEFAULT_MAX_SNAPSHOTS_PER_TYPE: usize = 4_096;

/// In-process store backed by concurrent maps
pub struct MemoryStore {
    /// Snapshot logs indexed by type, oldest first
    snapshots: DashMap<SnapshotType, VecDeque<MetricSnapshot>>,
    /// Alerts indexed by id
    alerts: RwLock<BTreeMap<u64, Alert>>,
    next_alert_id: AtomicU64,
    /// Integration health indexed by integration name
    integrations: DashMap<String, IntegrationHealthRecord>,
    max_snapshots_per_type: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_snapshot_cap(DEFAULT_MAX_SNAPSHOTS_PER_TYPE)
    }

    pub fn with_snapshot_cap(max_snapshots_per_type: usize) -> Self {
        Self {
            snapshots: DashMap::new(),
            alerts: RwLock::new(BTreeMap::new()),
            next_alert_id: AtomicU64::new(1),
            integrations: DashMap::new(),
            max_snapshots_per_type: max_snapshots_per_type.max(1),
        }
    }

    /// Number of stored snapshots across all types
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.iter().map(|e| e.value().len()).sum()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.read().len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_snapshot(&self, snapshot: MetricSnapshot) -> Result<(), StoreError> {
        let mut log = self.snapshots.entry(snapshot.snapshot_type).or_default();

        // Keep the log ordered by collection time even if a slow probe
        // finishes after a newer one
        let pos = log
            .iter()
            .rposition(|s| s.collected_at <= snapshot.collected_at)
            .map(|p| p + 1)
            .unwrap_or(0);
        log.insert(pos, snapshot);

        while log.len() > self.max_snapshots_per_type {
            log.pop_front();
        }
        Ok(())
    }

    async fn select_snapshots(
        &self,
        snapshot_type: SnapshotType,
        since: i64,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        Ok(self
            .snapshots
            .get(&snapshot_type)
            .map(|log| {
                log.iter()
                    .filter(|s| s.collected_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn recent_snapshots(
        &self,
        snapshot_type: SnapshotType,
        limit: usize,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        Ok(self
            .snapshots
            .get(&snapshot_type)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn newest_collection_time(&self) -> Result<Option<i64>, StoreError> {
        Ok(self
            .snapshots
            .iter()
            .filter_map(|e| e.value().back().map(|s| s.collected_at))
            .max())
    }

    async fn insert_alert(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let mut alerts = self.alerts.write();

        if alerts
            .values()
            .any(|a| a.is_open() && a.metric_name == alert.metric_name)
        {
            return Err(StoreError::Conflict(format!(
                "open alert already exists for '{}'",
                alert.metric_name
            )));
        }

        let id = self.next_alert_id.fetch_add(1, Ordering::SeqCst);
        let row = Alert {
            id,
            severity: alert.severity,
            source: alert.source,
            title: alert.title,
            description: alert.description,
            metric_name: alert.metric_name,
            actual_value: alert.actual_value,
            threshold: alert.threshold,
            breach_duration_ms: 0,
            first_seen_at: alert.seen_at,
            last_seen_at: alert.seen_at,
            status: AlertStatus::Active,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
            snooze_until: None,
        };
        alerts.insert(id, row.clone());
        Ok(row)
    }

    async fn update_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let mut alerts = self.alerts.write();
        match alerts.get_mut(&alert.id) {
            Some(existing) => {
                *existing = alert.clone();
                Ok(())
            }
            None => Err(StoreError::AlertNotFound(alert.id)),
        }
    }

    async fn select_alert(&self, id: u64) -> Result<Option<Alert>, StoreError> {
        Ok(self.alerts.read().get(&id).cloned())
    }

    async fn select_active_alert_by_metric(
        &self,
        metric_name: &str,
    ) -> Result<Option<Alert>, StoreError> {
        Ok(self
            .alerts
            .read()
            .values()
            .find(|a| a.is_open() && a.metric_name == metric_name)
            .cloned())
    }

    async fn select_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>, StoreError> {
        Ok(self
            .alerts
            .read()
            .values()
            .rev()
            .filter(|a| status.map(|s| a.status == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn select_resolved_since(&self, since: i64) -> Result<Vec<Alert>, StoreError> {
        Ok(self
            .alerts
            .read()
            .values()
            .filter(|a| a.resolved_at.map(|t| t >= since).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn update_alert_status(
        &self,
        id: u64,
        update: AlertStatusUpdate,
    ) -> Result<Option<Alert>, StoreError> {
        let mut alerts = self.alerts.write();
        Ok(alerts.get_mut(&id).map(|alert| {
            update.apply(alert);
            alert.clone()
        }))
    }

    async fn upsert_integration_health(
        &self,
        record: IntegrationHealthRecord,
    ) -> Result<(), StoreError> {
        self.integrations
            .insert(record.integration_name.clone(), record);
        Ok(())
    }

    async fn select_integration_health(&self) -> Result<Vec<IntegrationHealthRecord>, StoreError> {
        let mut records: Vec<IntegrationHealthRecord> = self
            .integrations
            .iter()
            .map(|e| e.value().clone())
            .collect();
        records.sort_by(|a, b| a.integration_name.cmp(&b.integration_name));
        Ok(records)
    }

    async fn prune_snapshots(&self, before: i64) -> Result<usize, StoreError> {
        let mut pruned = 0;
        for mut log in self.snapshots.iter_mut() {
            while log.front().map(|s| s.collected_at < before).unwrap_or(false) {
                log.pop_front();
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    async fn prune_resolved_alerts(&self, before: i64) -> Result<usize, StoreError> {
        let mut alerts = self.alerts.write();
        let initial = alerts.len();
        alerts.retain(|_, a| !a.resolved_at.map(|t| t < before).unwrap_or(false));
        Ok(initial - alerts.len())
    }
}
