//! Named performance budgets evaluated against stored snapshots

use serde::Serialize;

use crate::budget::{Severity, Thresholds};
use crate::snapshot::{SnapshotMetrics, SnapshotType};

/// Pulls one number out of a snapshot payload; `None` when the payload is
/// of another kind or the value is missing.
pub type MetricExtractor = fn(&SnapshotMetrics) -> Option<f64>;

/// A named budget: which snapshots to read, how to read them, and where the
/// lines are.
#[derive(Debug, Clone)]
pub struct BudgetDefinition {
    /// Display name, also the alert's metric name
    pub name: &'static str,
    pub snapshot_type: SnapshotType,
    pub extract: MetricExtractor,
    pub thresholds: Thresholds,
    pub window_minutes: u32,
    /// Subsystem reported on the alert
    pub source: &'static str,
    /// Suffix used when rendering values
    pub unit: &'static str,
}

impl BudgetDefinition {
    /// Windowed average of the extracted metric, skipping snapshots where it
    /// is missing or non-finite. Returns the average and the sample count.
    pub fn average<'a>(
        &self,
        snapshots: impl IntoIterator<Item = &'a SnapshotMetrics>,
    ) -> Option<(f64, usize)> {
        let values: Vec<f64> = snapshots
            .into_iter()
            .filter_map(self.extract)
            .filter(|v| v.is_finite())
            .collect();
        crate::snapshot::stats::mean(&values).map(|avg| (avg, values.len()))
    }

    pub fn format_value(&self, value: f64) -> String {
        if value.fract() == 0.0 {
            format!("{}{}", value, self.unit)
        } else {
            format!("{:.2}{}", value, self.unit)
        }
    }
}

/// Health of one budget as shown to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetHealth {
    Ok,
    Warning,
    Critical,
    NoData,
}

impl From<Severity> for BudgetHealth {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::None => BudgetHealth::Ok,
            Severity::Warn => BudgetHealth::Warning,
            Severity::Critical => BudgetHealth::Critical,
        }
    }
}

/// Current standing of one catalog budget
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub name: String,
    pub source: String,
    pub snapshot_type: SnapshotType,
    pub window_minutes: u32,
    pub warn_threshold: f64,
    pub critical_threshold: f64,
    pub higher_is_bad: bool,
    pub current_value: Option<f64>,
    pub samples: usize,
    pub status: BudgetHealth,
}

impl BudgetStatus {
    pub fn new(definition: &BudgetDefinition, average: Option<(f64, usize)>) -> Self {
        let (current_value, samples, status) = match average {
            Some((value, samples)) => (
                Some(value),
                samples,
                definition.thresholds.classify(value).into(),
            ),
            None => (None, 0, BudgetHealth::NoData),
        };

        Self {
            name: definition.name.to_string(),
            source: definition.source.to_string(),
            snapshot_type: definition.snapshot_type,
            window_minutes: definition.window_minutes,
            warn_threshold: definition.thresholds.warn,
            critical_threshold: definition.thresholds.critical,
            higher_is_bad: definition.thresholds.higher_is_bad,
            current_value,
            samples,
            status,
        }
    }
}

/// The budgets evaluated on every evaluator tick
pub fn default_catalog() -> Vec<BudgetDefinition> {
    vec![
        BudgetDefinition {
            name: "API p95 Latency",
            snapshot_type: SnapshotType::Api,
            extract: |m| m.as_api().and_then(|api| api.p95_ms),
            thresholds: Thresholds::higher_is_bad(500.0, 1_500.0),
            window_minutes: 15,
            source: "api",
            unit: " ms",
        },
        BudgetDefinition {
            name: "API Error Rate",
            snapshot_type: SnapshotType::Api,
            extract: |m| {
                m.as_api()
                    .filter(|api| api.request_count > 0)
                    .map(|api| api.error_rate_pct)
            },
            thresholds: Thresholds::higher_is_bad(2.0, 5.0),
            window_minutes: 15,
            source: "api",
            unit: "%",
        },
        BudgetDefinition {
            name: "DB Pool Saturation",
            snapshot_type: SnapshotType::Database,
            extract: |m| m.as_database().map(|db| db.pool_saturation_pct),
            thresholds: Thresholds::higher_is_bad(70.0, 90.0),
            window_minutes: 5,
            source: "database",
            unit: "%",
        },
        BudgetDefinition {
            name: "DB Query p95",
            snapshot_type: SnapshotType::Database,
            extract: |m| m.as_database().and_then(|db| db.query_p95_ms),
            thresholds: Thresholds::higher_is_bad(200.0, 1_000.0),
            window_minutes: 15,
            source: "database",
            unit: " ms",
        },
        BudgetDefinition {
            name: "Job Queue Depth",
            snapshot_type: SnapshotType::JobQueue,
            extract: |m| m.as_job_queue().map(|q| q.pending as f64),
            thresholds: Thresholds::higher_is_bad(100.0, 500.0),
            window_minutes: 15,
            source: "job_queue",
            unit: " jobs",
        },
        BudgetDefinition {
            name: "Stuck Jobs",
            snapshot_type: SnapshotType::JobQueue,
            extract: |m| m.as_job_queue().map(|q| q.stuck_jobs as f64),
            thresholds: Thresholds::higher_is_bad(1.0, 5.0),
            window_minutes: 5,
            source: "job_queue",
            unit: " jobs",
        },
        BudgetDefinition {
            name: "Object Storage Error Rate",
            snapshot_type: SnapshotType::ObjectStorage,
            extract: |m| m.as_object_storage().and_then(|s| s.error_rate),
            thresholds: Thresholds::higher_is_bad(0.05, 0.20),
            window_minutes: 15,
            source: "object_storage",
            unit: "",
        },
        BudgetDefinition {
            name: "Cache Hit Rate",
            snapshot_type: SnapshotType::Cache,
            extract: |m| m.as_cache().and_then(|c| c.hit_rate),
            thresholds: Thresholds::lower_is_bad(0.60, 0.30),
            window_minutes: 15,
            source: "cache",
            unit: "",
        },
        BudgetDefinition {
            name: "Portal Route p95",
            snapshot_type: SnapshotType::Portal,
            extract: |m| m.as_portal().and_then(|p| p.route_p95_ms),
            thresholds: Thresholds::higher_is_bad(1_000.0, 3_000.0),
            window_minutes: 15,
            source: "portal",
            unit: " ms",
        },
        BudgetDefinition {
            name: "Disk Usage",
            snapshot_type: SnapshotType::Storage,
            extract: |m| {
                m.as_storage()
                    .filter(|s| s.quota_bytes > 0)
                    .map(|s| s.usage_pct)
            },
            thresholds: Thresholds::higher_is_bad(80.0, 90.0),
            window_minutes: 15,
            source: "storage",
            unit: "%",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ApiMetrics, CacheMetrics, DatabaseMetrics};

    fn pool(saturation: f64) -> SnapshotMetrics {
        SnapshotMetrics::Database(DatabaseMetrics {
            pool_saturation_pct: saturation,
            ..Default::default()
        })
    }

    fn budget(name: &str) -> BudgetDefinition {
        default_catalog()
            .into_iter()
            .find(|b| b.name == name)
            .unwrap()
    }

    #[test]
    fn test_catalog_names_unique() {
        let catalog = default_catalog();
        let mut names: Vec<_> = catalog.iter().map(|b| b.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), catalog.len());
    }

    #[test]
    fn test_average_skips_missing_and_non_finite() {
        let db = budget("DB Pool Saturation");
        let snapshots = vec![
            pool(80.0),
            pool(f64::NAN),
            pool(100.0),
            SnapshotMetrics::Api(ApiMetrics::default()),
        ];
        assert_eq!(db.average(&snapshots), Some((90.0, 2)));
        assert_eq!(db.average(&Vec::<SnapshotMetrics>::new()), None);
    }

    #[test]
    fn test_error_rate_needs_traffic() {
        let errors = budget("API Error Rate");
        let idle = SnapshotMetrics::Api(ApiMetrics::default());
        assert_eq!((errors.extract)(&idle), None);

        let busy = SnapshotMetrics::Api(ApiMetrics {
            request_count: 100,
            error_count: 3,
            error_rate_pct: 3.0,
            ..Default::default()
        });
        assert_eq!((errors.extract)(&busy), Some(3.0));
    }

    #[test]
    fn test_status_for_lower_is_bad_budget() {
        let cache = budget("Cache Hit Rate");
        let low = SnapshotMetrics::Cache(CacheMetrics {
            hit_rate: Some(0.25),
            ..Default::default()
        });

        let status = BudgetStatus::new(&cache, cache.average([&low]));
        assert_eq!(status.status, BudgetHealth::Critical);
        assert!(!status.higher_is_bad);

        let empty = BudgetStatus::new(&cache, None);
        assert_eq!(empty.status, BudgetHealth::NoData);
        assert_eq!(empty.samples, 0);
    }

    #[test]
    fn test_format_value() {
        let db = budget("DB Pool Saturation");
        assert_eq!(db.format_value(95.0), "95%");
        assert_eq!(db.format_value(72.456), "72.46%");
    }
}
