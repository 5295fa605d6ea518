//! Alert lifecycle: catalog evaluation, dedup, auto-resolve, notification

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{self, MissedTickBehavior};

use super::catalog::{default_catalog, BudgetDefinition, BudgetStatus};
use super::notifier::Notifier;
use crate::budget::BudgetEngine;
use crate::clock::{Clock, HOUR_MS, MINUTE_MS};
use crate::collector::DEGRADED_ERROR_RATE;
use crate::guard::BusyGuard;
use crate::store::{
    Alert, AlertSeverity, AlertStatus, AlertStatusUpdate, IntegrationHealthRecord,
    IntegrationStatus, NewAlert, Store, StoreError,
};

/// Longest snooze an operator can request (one week)
pub const MAX_SNOOZE_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub interval: Duration,
    /// Open alerts not seen for this long are resolved
    pub stale_after_ms: i64,
    /// Minimum gap between emails for the same metric
    pub notification_cooldown_ms: i64,
    pub recipients: Vec<String>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after_ms: 5 * MINUTE_MS,
            notification_cooldown_ms: 30 * MINUTE_MS,
            recipients: Vec::new(),
        }
    }
}

/// One breaching observation handed to [`AlertEvaluator::create_or_update_alert`]
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub metric_name: String,
    pub source: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub actual: f64,
    pub threshold: f64,
}

/// Whether an upsert created a new row or refreshed the open one
#[derive(Debug, Clone, PartialEq)]
pub enum AlertUpsert {
    Created(Alert),
    Updated(Alert),
}

impl AlertUpsert {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertUpsert::Created(alert) | AlertUpsert::Updated(alert) => alert,
        }
    }
}

/// Counts shown on the alert dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertStats {
    pub critical_count: usize,
    pub warning_count: usize,
    pub acknowledged_count: usize,
    pub snoozed_count: usize,
    pub resolved_count_24h: usize,
}

/// What one evaluation tick did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationReport {
    pub evaluated_at: i64,
    pub breaches: usize,
    pub created: usize,
    pub updated: usize,
    pub resolved: usize,
    pub woken: usize,
}

/// Operator action errors
#[derive(Debug, thiserror::Error)]
pub enum AlertActionError {
    #[error("Alert {0} not found")]
    NotFound(u64),

    #[error("Alert {id} is {status} and cannot be changed")]
    InvalidTransition { id: u64, status: AlertStatus },

    #[error("Snooze must be between 1 and {} minutes, got {0}", MAX_SNOOZE_MINUTES)]
    InvalidSnooze(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Turns sustained breaches into persisted, deduplicated alerts
pub struct AlertEvaluator {
    store: Arc<dyn Store>,
    engine: Arc<BudgetEngine>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    catalog: Vec<BudgetDefinition>,
    config: EvaluatorConfig,
    /// Last successful email per metric name
    cooldowns: Mutex<HashMap<String, i64>>,
    is_evaluating: AtomicBool,
    running: Arc<AtomicBool>,
}

impl AlertEvaluator {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<BudgetEngine>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            store,
            engine,
            clock,
            notifier,
            catalog: default_catalog(),
            config,
            cooldowns: Mutex::new(HashMap::new()),
            is_evaluating: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the default budget catalog
    pub fn with_catalog(mut self, catalog: Vec<BudgetDefinition>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &[BudgetDefinition] {
        &self.catalog
    }

    /// Start the periodic evaluation loop
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Alert evaluator started with interval {:?}", self.config.interval);

            let mut interval = time::interval(self.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                let evaluator = Arc::clone(&self);
                tokio::spawn(async move {
                    evaluator.evaluate_once().await;
                });
            }

            tracing::info!("Alert evaluator stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one evaluation tick. Returns `None` when a tick is already running.
    pub async fn evaluate_once(&self) -> Option<EvaluationReport> {
        let Some(_busy) = BusyGuard::try_acquire(&self.is_evaluating) else {
            tracing::warn!("Previous evaluation still running, skipping tick");
            return None;
        };

        let now = self.clock.now_ms();
        let mut report = EvaluationReport {
            evaluated_at: now,
            ..Default::default()
        };

        match self.wake_snoozed(now).await {
            Ok(woken) => report.woken = woken.len(),
            Err(e) => tracing::error!(error = %e, "Failed to wake snoozed alerts"),
        }

        let mut breaches = self.evaluate_budgets(now).await;
        breaches.extend(self.evaluate_integrations(now).await);
        report.breaches = breaches.len();

        for breach in breaches {
            match self.create_or_update_alert(breach, now).await {
                Ok(AlertUpsert::Created(_)) => report.created += 1,
                Ok(AlertUpsert::Updated(_)) => report.updated += 1,
                Err(e) => tracing::error!(error = %e, "Failed to upsert alert"),
            }
        }

        // Staleness only means recovery while snapshots are still arriving
        match self.store.newest_collection_time().await {
            Ok(Some(newest)) if now - newest < self.config.stale_after_ms => {
                match self.auto_resolve_alerts(now).await {
                    Ok(resolved) => report.resolved = resolved.len(),
                    Err(e) => tracing::error!(error = %e, "Failed to auto-resolve alerts"),
                }
            }
            Ok(_) => tracing::warn!("No recent snapshots, skipping auto-resolve"),
            Err(e) => tracing::error!(error = %e, "Failed to read collection time"),
        }

        tracing::debug!(
            breaches = report.breaches,
            created = report.created,
            resolved = report.resolved,
            "Evaluation finished"
        );

        Some(report)
    }

    /// Average every catalog budget over its window, feed the engine, and
    /// return the breaching ones
    pub async fn evaluate_budgets(&self, now: i64) -> Vec<Breach> {
        let mut breaches = Vec::new();

        for definition in &self.catalog {
            let average = match self.windowed_average(definition, now).await {
                Ok(Some(average)) => average,
                Ok(None) => {
                    tracing::debug!(budget = definition.name, "No data in window");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(budget = definition.name, error = %e, "Failed to read snapshots");
                    continue;
                }
            };

            let (value, samples) = average;
            self.engine
                .evaluate(definition.name, value, definition.thresholds, None);

            let severity = definition.thresholds.classify(value);
            let Some(alert_severity) = AlertSeverity::from_severity(severity) else {
                continue;
            };
            let threshold = definition.thresholds.threshold_for(severity);

            breaches.push(Breach {
                metric_name: definition.name.to_string(),
                source: definition.source.to_string(),
                severity: alert_severity,
                title: format!("{} budget exceeded", definition.name),
                description: format!(
                    "{} averaged {} over the last {} minutes ({} samples), {} threshold is {}",
                    definition.name,
                    definition.format_value(value),
                    definition.window_minutes,
                    samples,
                    alert_severity,
                    definition.format_value(threshold),
                ),
                actual: value,
                threshold,
            });
        }

        breaches
    }

    /// Map down and degraded integrations to breaches. Records not checked
    /// recently are ignored.
    pub async fn evaluate_integrations(&self, now: i64) -> Vec<Breach> {
        let records = match self.store.select_integration_health().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read integration health");
                return Vec::new();
            }
        };

        records
            .iter()
            .filter(|r| now - r.checked_at < self.config.stale_after_ms)
            .filter_map(integration_breach)
            .collect()
    }

    /// Refresh the open alert for the breach's metric, or open a new one and
    /// notify
    pub async fn create_or_update_alert(
        &self,
        breach: Breach,
        now: i64,
    ) -> Result<AlertUpsert, StoreError> {
        if let Some(mut alert) = self
            .store
            .select_active_alert_by_metric(&breach.metric_name)
            .await?
        {
            alert.last_seen_at = now;
            alert.actual_value = breach.actual;
            alert.breach_duration_ms = now - alert.first_seen_at;

            if breach.severity > alert.severity {
                tracing::warn!(
                    alert_id = alert.id,
                    metric = %alert.metric_name,
                    from = %alert.severity,
                    to = %breach.severity,
                    "Alert escalated"
                );
                alert.severity = breach.severity;
                alert.threshold = breach.threshold;
                alert.title = breach.title;
                alert.description = breach.description;
            }

            self.store.update_alert(&alert).await?;
            return Ok(AlertUpsert::Updated(alert));
        }

        let alert = self
            .store
            .insert_alert(NewAlert {
                severity: breach.severity,
                source: breach.source,
                title: breach.title,
                description: breach.description,
                metric_name: breach.metric_name,
                actual_value: breach.actual,
                threshold: breach.threshold,
                seen_at: now,
            })
            .await?;

        tracing::warn!(
            alert_id = alert.id,
            metric = %alert.metric_name,
            severity = %alert.severity,
            actual = alert.actual_value,
            "Alert created"
        );

        self.notify(&alert, now).await;

        Ok(AlertUpsert::Created(alert))
    }

    /// Resolve every open alert not seen within the staleness window
    pub async fn auto_resolve_alerts(&self, now: i64) -> Result<Vec<Alert>, StoreError> {
        let stale: Vec<Alert> = self
            .store
            .select_alerts(None)
            .await?
            .into_iter()
            .filter(|a| a.is_open() && now - a.last_seen_at >= self.config.stale_after_ms)
            .collect();

        let mut resolved = Vec::with_capacity(stale.len());
        for alert in stale {
            if let Some(alert) = self
                .store
                .update_alert_status(alert.id, AlertStatusUpdate::Resolved { at: now })
                .await?
            {
                tracing::info!(
                    alert_id = alert.id,
                    metric = %alert.metric_name,
                    open_for_ms = now - alert.first_seen_at,
                    "Alert resolved"
                );
                resolved.push(alert);
            }
        }

        Ok(resolved)
    }

    /// Return snoozed alerts whose snooze has run out to active
    pub async fn wake_snoozed(&self, now: i64) -> Result<Vec<Alert>, StoreError> {
        let expired: Vec<u64> = self
            .store
            .select_alerts(Some(AlertStatus::Snoozed))
            .await?
            .into_iter()
            .filter(|a| a.snooze_until.map(|until| until <= now).unwrap_or(true))
            .map(|a| a.id)
            .collect();

        let mut woken = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(alert) = self
                .store
                .update_alert_status(id, AlertStatusUpdate::Reactivated)
                .await?
            {
                tracing::info!(alert_id = id, metric = %alert.metric_name, "Snooze expired");
                woken.push(alert);
            }
        }

        Ok(woken)
    }

    pub async fn acknowledge_alert(&self, id: u64, user_id: &str) -> Result<Alert, AlertActionError> {
        let alert = self.open_alert(id).await?;
        if alert.status == AlertStatus::Acknowledged {
            return Ok(alert);
        }

        let now = self.clock.now_ms();
        let alert = self
            .store
            .update_alert_status(
                id,
                AlertStatusUpdate::Acknowledged {
                    by: user_id.to_string(),
                    at: now,
                },
            )
            .await?
            .ok_or(AlertActionError::NotFound(id))?;

        tracing::info!(alert_id = id, user_id = %user_id, "Alert acknowledged");
        Ok(alert)
    }

    pub async fn snooze_alert(
        &self,
        id: u64,
        minutes: i64,
        user_id: &str,
    ) -> Result<Alert, AlertActionError> {
        if !(1..=MAX_SNOOZE_MINUTES).contains(&minutes) {
            return Err(AlertActionError::InvalidSnooze(minutes));
        }
        self.open_alert(id).await?;

        let until = self.clock.now_ms() + minutes * MINUTE_MS;
        let alert = self
            .store
            .update_alert_status(id, AlertStatusUpdate::Snoozed { until })
            .await?
            .ok_or(AlertActionError::NotFound(id))?;

        tracing::info!(alert_id = id, user_id = %user_id, minutes, "Alert snoozed");
        Ok(alert)
    }

    /// Open alerts that are not currently snoozed, critical first then newest
    pub async fn active_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        let now = self.clock.now_ms();
        let mut alerts: Vec<Alert> = self
            .store
            .select_alerts(None)
            .await?
            .into_iter()
            .filter(|a| {
                matches!(
                    a.effective_status(now),
                    AlertStatus::Active | AlertStatus::Acknowledged
                )
            })
            .collect();

        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.last_seen_at.cmp(&a.last_seen_at))
        });
        Ok(alerts)
    }

    pub async fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>, StoreError> {
        self.store.select_alerts(status).await
    }

    pub async fn alert_stats(&self) -> Result<AlertStats, StoreError> {
        let now = self.clock.now_ms();
        let mut stats = AlertStats::default();

        for alert in self.store.select_alerts(None).await? {
            match alert.effective_status(now) {
                AlertStatus::Active => match alert.severity {
                    AlertSeverity::Critical => stats.critical_count += 1,
                    AlertSeverity::Warning => stats.warning_count += 1,
                },
                AlertStatus::Acknowledged => stats.acknowledged_count += 1,
                AlertStatus::Snoozed => stats.snoozed_count += 1,
                AlertStatus::Resolved => {}
            }
        }

        stats.resolved_count_24h = self
            .store
            .select_resolved_since(now - 24 * HOUR_MS)
            .await?
            .len();

        Ok(stats)
    }

    /// Current standing of every catalog budget, without side effects
    pub async fn budget_statuses(&self) -> Result<Vec<BudgetStatus>, StoreError> {
        let now = self.clock.now_ms();
        let mut statuses = Vec::with_capacity(self.catalog.len());
        for definition in &self.catalog {
            let average = self.windowed_average(definition, now).await?;
            statuses.push(BudgetStatus::new(definition, average));
        }
        Ok(statuses)
    }

    async fn windowed_average(
        &self,
        definition: &BudgetDefinition,
        now: i64,
    ) -> Result<Option<(f64, usize)>, StoreError> {
        let since = now - i64::from(definition.window_minutes) * MINUTE_MS;
        let snapshots = self
            .store
            .select_snapshots(definition.snapshot_type, since)
            .await?;
        Ok(definition.average(snapshots.iter().map(|s| &s.metrics)))
    }

    async fn open_alert(&self, id: u64) -> Result<Alert, AlertActionError> {
        let alert = self
            .store
            .select_alert(id)
            .await?
            .ok_or(AlertActionError::NotFound(id))?;

        if !alert.is_open() {
            return Err(AlertActionError::InvalidTransition {
                id,
                status: alert.status,
            });
        }
        Ok(alert)
    }

    /// Email a new alert unless its metric is cooling down. Failures are
    /// logged and leave the cooldown untouched.
    async fn notify(&self, alert: &Alert, now: i64) -> bool {
        if self.config.recipients.is_empty() {
            tracing::debug!(alert_id = alert.id, "No alert recipients configured");
            return false;
        }

        let cooling_down = self
            .cooldowns
            .lock()
            .get(&alert.metric_name)
            .map(|last_sent| now - last_sent < self.config.notification_cooldown_ms)
            .unwrap_or(false);
        if cooling_down {
            tracing::info!(
                alert_id = alert.id,
                metric = %alert.metric_name,
                "Notification suppressed by cooldown"
            );
            return false;
        }

        let subject = format!(
            "[{}] {}",
            alert.severity.as_str().to_uppercase(),
            alert.title
        );
        let tags = [
            ("category", "performance_alert"),
            ("severity", alert.severity.as_str()),
            ("source", alert.source.as_str()),
        ];

        match self
            .notifier
            .send_email(&self.config.recipients, &subject, &render_email(alert), &tags)
            .await
        {
            Ok(()) => {
                self.cooldowns.lock().insert(alert.metric_name.clone(), now);
                tracing::info!(alert_id = alert.id, "Alert notification sent");
                true
            }
            Err(e) => {
                tracing::error!(alert_id = alert.id, error = %e, "Failed to send alert notification");
                false
            }
        }
    }
}

fn integration_breach(record: &IntegrationHealthRecord) -> Option<Breach> {
    let severity = match record.status {
        IntegrationStatus::Down => AlertSeverity::Critical,
        IntegrationStatus::Degraded => AlertSeverity::Warning,
        IntegrationStatus::Healthy | IntegrationStatus::NotConfigured => return None,
    };

    let reason = record
        .last_failure_reason
        .as_deref()
        .unwrap_or("no failure reason recorded");

    Some(Breach {
        metric_name: format!("integration:{}", record.integration_name),
        source: "integration".to_string(),
        severity,
        title: format!("{} integration {}", record.integration_name, record.status),
        description: format!(
            "{} is {} with {:.0}% of recent checks failing: {}",
            record.integration_name,
            record.status,
            record.error_rate * 100.0,
            reason
        ),
        actual: record.error_rate * 100.0,
        threshold: DEGRADED_ERROR_RATE * 100.0,
    })
}

fn render_email(alert: &Alert) -> String {
    let observed_at = chrono::DateTime::from_timestamp_millis(alert.first_seen_at)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| alert.first_seen_at.to_string());

    format!(
        "<h2>{title}</h2>\
         <p>{description}</p>\
         <table>\
         <tr><td>Severity</td><td>{severity}</td></tr>\
         <tr><td>Source</td><td>{source}</td></tr>\
         <tr><td>Metric</td><td>{metric}</td></tr>\
         <tr><td>Actual</td><td>{actual:.2}</td></tr>\
         <tr><td>Threshold</td><td>{threshold:.2}</td></tr>\
         <tr><td>First seen</td><td>{observed_at}</td></tr>\
         </table>",
        title = alert.title,
        description = alert.description,
        severity = alert.severity,
        source = alert.source,
        metric = alert.metric_name,
        actual = alert.actual_value,
        threshold = alert.threshold,
        observed_at = observed_at,
    )
}
