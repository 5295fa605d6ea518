//! System-wide status and KPIs for the dashboard

use serde::Serialize;

use crate::alerts::{AlertEvaluator, AlertStats};
use crate::budget::{BudgetEngine, BudgetSummary};
use crate::collector::MetricsCollector;
use crate::snapshot::SnapshotType;
use crate::store::{Alert, AlertSeverity, StoreError};

/// Worst severity among alerts needing attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Healthy,
    Warning,
    Critical,
}

impl SystemStatus {
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        match alerts.iter().map(|a| a.severity).max() {
            Some(AlertSeverity::Critical) => SystemStatus::Critical,
            Some(AlertSeverity::Warning) => SystemStatus::Warning,
            None => SystemStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Kpis {
    pub api_p95_ms: Option<f64>,
    pub api_p99_ms: Option<f64>,
    pub api_error_rate_pct: Option<f64>,
    pub db_query_p95_ms: Option<f64>,
    pub queue_depth: Option<u64>,
    pub stuck_jobs: Option<usize>,
    pub violations_last_15m: usize,
    pub last_collection_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemOverview {
    pub status: SystemStatus,
    pub kpis: Kpis,
    pub alerts: AlertStats,
    pub budgets: BudgetSummary,
}

/// Assemble the overview from the latest snapshots, open alerts and the
/// engine summary
pub async fn build_overview(
    collector: &MetricsCollector,
    evaluator: &AlertEvaluator,
    engine: &BudgetEngine,
) -> Result<SystemOverview, StoreError> {
    let active = evaluator.active_alerts().await?;
    let alerts = evaluator.alert_stats().await?;
    let budgets = engine.summary();

    let api = collector.latest_snapshot(SnapshotType::Api);
    let api = api.as_ref().and_then(|s| s.metrics.as_api());
    let database = collector.latest_snapshot(SnapshotType::Database);
    let database = database.as_ref().and_then(|s| s.metrics.as_database());
    let queue = collector.latest_snapshot(SnapshotType::JobQueue);
    let queue = queue.as_ref().and_then(|s| s.metrics.as_job_queue());

    let kpis = Kpis {
        api_p95_ms: api.and_then(|a| a.p95_ms),
        api_p99_ms: api.and_then(|a| a.p99_ms),
        api_error_rate_pct: api.filter(|a| a.request_count > 0).map(|a| a.error_rate_pct),
        db_query_p95_ms: database.and_then(|d| d.query_p95_ms),
        queue_depth: queue.map(|q| q.pending),
        stuck_jobs: queue.map(|q| q.stuck_jobs),
        violations_last_15m: budgets.violations_last_15m,
        last_collection_at: collector.last_collection_time(),
    };

    Ok(SystemOverview {
        status: SystemStatus::from_alerts(&active),
        kpis,
        alerts,
        budgets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Breach, EvaluatorConfig, LogNotifier};
    use crate::clock::{Clock, ManualClock};
    use crate::collector::{CollectorConfig, RequestTiming};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_overview_reflects_worst_alert() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(BudgetEngine::new(clock.clone()));
        let collector = MetricsCollector::new(
            store.clone(),
            engine.clone(),
            clock.clone(),
            CollectorConfig::default(),
        );
        let evaluator = AlertEvaluator::new(
            store.clone(),
            engine.clone(),
            clock.clone(),
            Arc::new(LogNotifier),
            EvaluatorConfig::default(),
        );

        let overview = build_overview(&collector, &evaluator, &engine).await.unwrap();
        assert_eq!(overview.status, SystemStatus::Healthy);
        assert_eq!(overview.kpis, Kpis::default());

        let now = clock.now_ms();
        for status in [200, 200, 200, 500] {
            collector
                .request_log()
                .record(RequestTiming::new("GET", "/api/overview", status, 40.0, now));
        }
        collector.collect_once().await.unwrap();

        for (metric, severity) in [
            ("Disk Usage", AlertSeverity::Warning),
            ("Stuck Jobs", AlertSeverity::Critical),
        ] {
            evaluator
                .create_or_update_alert(
                    Breach {
                        metric_name: metric.to_string(),
                        source: "test".to_string(),
                        severity,
                        title: metric.to_string(),
                        description: String::new(),
                        actual: 1.0,
                        threshold: 1.0,
                    },
                    now,
                )
                .await
                .unwrap();
        }

        let overview = build_overview(&collector, &evaluator, &engine).await.unwrap();
        assert_eq!(overview.status, SystemStatus::Critical);
        assert_eq!(overview.alerts.critical_count, 1);
        assert_eq!(overview.alerts.warning_count, 1);
        assert_eq!(overview.kpis.api_error_rate_pct, Some(25.0));
        assert_eq!(overview.kpis.api_p95_ms, Some(40.0));
        assert_eq!(overview.kpis.last_collection_at, Some(now));
        assert_eq!(overview.kpis.queue_depth, None);
    }

    #[test]
    fn test_status_from_no_alerts() {
        assert_eq!(SystemStatus::from_alerts(&[]), SystemStatus::Healthy);
    }
}
