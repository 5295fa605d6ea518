//! Row types owned by the store

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::budget::Severity;

/// Severity of an operator-facing alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    /// Alerts only exist for breaching severities
    pub fn from_severity(severity: Severity) -> Option<Self> {
        match severity {
            Severity::None => None,
            Severity::Warn => Some(AlertSeverity::Warning),
            Severity::Critical => Some(AlertSeverity::Critical),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Snoozed,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Snoozed => "snoozed",
            AlertStatus::Resolved => "resolved",
        }
    }

    /// Every status except resolved keeps the metric's alert slot occupied
    pub fn is_open(self) -> bool {
        self != AlertStatus::Resolved
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "snoozed" => Ok(AlertStatus::Snoozed),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(format!("Unknown alert status: {}", other)),
        }
    }
}

/// Durable alert row. `metric_name` is unique among open alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub severity: AlertSeverity,
    pub source: String,
    pub title: String,
    pub description: String,
    pub metric_name: String,
    pub actual_value: f64,
    pub threshold: f64,
    /// Millis between first and last observation
    pub breach_duration_ms: i64,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub status: AlertStatus,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<i64>,
    pub resolved_at: Option<i64>,
    pub snooze_until: Option<i64>,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Status as operators should see it at `now`: a snooze that has run
    /// out reads as active even before the evaluator wakes the row.
    pub fn effective_status(&self, now: i64) -> AlertStatus {
        match (self.status, self.snooze_until) {
            (AlertStatus::Snoozed, Some(until)) if until <= now => AlertStatus::Active,
            (status, _) => status,
        }
    }
}

/// Fields of a freshly detected alert
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub severity: AlertSeverity,
    pub source: String,
    pub title: String,
    pub description: String,
    pub metric_name: String,
    pub actual_value: f64,
    pub threshold: f64,
    pub seen_at: i64,
}

/// Status transition applied by `Store::update_alert_status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertStatusUpdate {
    Acknowledged { by: String, at: i64 },
    Snoozed { until: i64 },
    Reactivated,
    Resolved { at: i64 },
}

impl AlertStatusUpdate {
    pub fn status(&self) -> AlertStatus {
        match self {
            AlertStatusUpdate::Acknowledged { .. } => AlertStatus::Acknowledged,
            AlertStatusUpdate::Snoozed { .. } => AlertStatus::Snoozed,
            AlertStatusUpdate::Reactivated => AlertStatus::Active,
            AlertStatusUpdate::Resolved { .. } => AlertStatus::Resolved,
        }
    }

    /// Apply the transition to a row
    pub fn apply(&self, alert: &mut Alert) {
        alert.status = self.status();
        match self {
            AlertStatusUpdate::Acknowledged { by, at } => {
                alert.acknowledged_by = Some(by.clone());
                alert.acknowledged_at = Some(*at);
                alert.snooze_until = None;
            }
            AlertStatusUpdate::Snoozed { until } => {
                alert.snooze_until = Some(*until);
            }
            AlertStatusUpdate::Reactivated => {
                alert.snooze_until = None;
            }
            AlertStatusUpdate::Resolved { at } => {
                alert.resolved_at = Some(*at);
                alert.snooze_until = None;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Healthy,
    Degraded,
    Down,
    NotConfigured,
}

impl IntegrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IntegrationStatus::Healthy => "healthy",
            IntegrationStatus::Degraded => "degraded",
            IntegrationStatus::Down => "down",
            IntegrationStatus::NotConfigured => "not_configured",
        }
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest known health of one third-party dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationHealthRecord {
    pub integration_name: String,
    pub status: IntegrationStatus,
    pub latency_p95_ms: Option<f64>,
    /// Failed checks over recent checks, 0..=1
    pub error_rate: f64,
    pub last_success_at: Option<i64>,
    pub last_failure_at: Option<i64>,
    pub last_failure_reason: Option<String>,
    pub checked_at: i64,
}
