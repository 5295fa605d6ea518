//! Threshold, severity and per-key state types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a budget breach, ordered none < warn < critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Warn,
    Critical,
}

impl Severity {
    pub fn is_breach(self) -> bool {
        self != Severity::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Warn => "warn",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Warn/critical pair plus the direction in which values get worse
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warn: f64,
    pub critical: f64,
    pub higher_is_bad: bool,
}

impl Thresholds {
    /// Latency, saturation, error counts
    pub const fn higher_is_bad(warn: f64, critical: f64) -> Self {
        Self {
            warn,
            critical,
            higher_is_bad: true,
        }
    }

    /// Hit rates and other ratios where dropping is the problem
    pub const fn lower_is_bad(warn: f64, critical: f64) -> Self {
        Self {
            warn,
            critical,
            higher_is_bad: false,
        }
    }

    /// Classify a sample. Critical wins over warn.
    pub fn classify(&self, actual: f64) -> Severity {
        if self.higher_is_bad {
            if actual >= self.critical {
                Severity::Critical
            } else if actual >= self.warn {
                Severity::Warn
            } else {
                Severity::None
            }
        } else if actual <= self.critical {
            Severity::Critical
        } else if actual <= self.warn {
            Severity::Warn
        } else {
            Severity::None
        }
    }

    /// Threshold value crossed at the given severity
    pub fn threshold_for(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            _ => self.warn,
        }
    }
}

/// Key of a tracked metric: the metric name plus an optional sub-key
/// (an endpoint, a route, an integration)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub metric: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_key: Option<String>,
}

impl MetricKey {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            sub_key: None,
        }
    }

    pub fn with_sub_key(metric: impl Into<String>, sub_key: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            sub_key: Some(sub_key.into()),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_key {
            Some(sub) => write!(f, "{}[{}]", self.metric, sub),
            None => f.write_str(&self.metric),
        }
    }
}

/// Debounce state for one metric key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricState {
    pub breach_count: u32,
    pub clear_count: u32,
    pub current_severity: Severity,
    pub is_violating: bool,
    pub last_value: f64,
    /// Unix millis of the last evaluated sample
    pub last_checked: i64,
}

/// A newly declared violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub metric_name: String,
    pub actual: f64,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Outcome of a single `evaluate` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub violated: bool,
    pub new_violation: bool,
    pub severity: Severity,
}

/// A key that is currently violating
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveViolation {
    pub key: MetricKey,
    pub severity: Severity,
    pub last_value: f64,
    pub last_checked: i64,
}

/// Aggregate view over the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BudgetSummary {
    pub active_violations: usize,
    pub critical_violations: usize,
    pub tracked_metrics: usize,
    pub violations_last_15m: usize,
    pub violations_last_hour: usize,
}
