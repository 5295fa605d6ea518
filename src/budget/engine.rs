//! Hysteresis state machine over named metrics

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::types::{
    ActiveViolation, BudgetSummary, Evaluation, MetricKey, MetricState, Severity, Thresholds,
    ViolationRecord,
};
use crate::clock::{Clock, HOUR_MS, MINUTE_MS};

/// Debounce settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Consecutive breaching samples needed to declare a violation
    pub breach_threshold: u32,
    /// Consecutive clear samples needed to lift a violation
    pub clear_threshold: u32,
    /// Capacity of the violation history ring buffer
    pub history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            breach_threshold: 2,
            clear_threshold: 2,
            history_capacity: 500,
        }
    }
}

#[derive(Default)]
struct EngineInner {
    states: HashMap<MetricKey, MetricState>,
    history: VecDeque<ViolationRecord>,
}

/// Per-key threshold evaluator with breach/clear debouncing.
///
/// Entering the violating state requires `breach_threshold` consecutive
/// breaching samples; leaving it requires `clear_threshold` consecutive clear
/// samples. Escalation from warn to critical while already violating happens
/// on the first critical sample.
///
/// Shared by the collector and the evaluator; the lock is only held for the
/// in-memory bookkeeping of a single call.
pub struct BudgetEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<EngineInner>,
}

impl BudgetEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, EngineConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(EngineInner::default()),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Feed one sample for `metric` (optionally scoped by `sub_key`).
    ///
    /// Non-finite samples are ignored and report the key's unchanged state.
    pub fn evaluate(
        &self,
        metric: &str,
        actual: f64,
        thresholds: Thresholds,
        sub_key: Option<&str>,
    ) -> Evaluation {
        let key = MetricKey {
            metric: metric.to_string(),
            sub_key: sub_key.map(str::to_string),
        };
        let now = self.clock.now_ms();

        let mut inner = self.inner.lock();

        if !actual.is_finite() {
            let state = inner.states.get(&key);
            return Evaluation {
                violated: state.map(|s| s.is_violating).unwrap_or(false),
                new_violation: false,
                severity: state.map(|s| s.current_severity).unwrap_or_default(),
            };
        }

        let sample_severity = thresholds.classify(actual);
        let state = inner.states.entry(key.clone()).or_default();
        state.last_value = actual;
        state.last_checked = now;

        let mut declared = None;

        if sample_severity.is_breach() {
            state.breach_count = state.breach_count.saturating_add(1);
            state.clear_count = 0;

            if !state.is_violating {
                if state.breach_count >= self.config.breach_threshold {
                    state.is_violating = true;
                    state.current_severity = sample_severity;
                    declared = Some(ViolationRecord {
                        metric_name: key.metric.clone(),
                        actual,
                        threshold: thresholds.threshold_for(sample_severity),
                        severity: sample_severity,
                        endpoint: key.sub_key.clone(),
                        timestamp: now,
                        details: Some(format!(
                            "{} consecutive breaching samples",
                            state.breach_count
                        )),
                    });
                }
            } else if sample_severity > state.current_severity {
                tracing::warn!(
                    metric = %key,
                    actual,
                    from = %state.current_severity,
                    to = %sample_severity,
                    "Budget violation escalated"
                );
                state.current_severity = sample_severity;
            }
        } else {
            state.clear_count = state.clear_count.saturating_add(1);
            state.breach_count = 0;

            if state.is_violating && state.clear_count >= self.config.clear_threshold {
                state.is_violating = false;
                state.current_severity = Severity::None;
                tracing::info!(metric = %key, actual, "Budget violation cleared");
            }
        }

        let evaluation = Evaluation {
            violated: state.is_violating,
            new_violation: declared.is_some(),
            severity: state.current_severity,
        };

        if let Some(record) = declared {
            tracing::warn!(
                metric = %key,
                actual,
                threshold = record.threshold,
                severity = %record.severity,
                "Budget violation declared"
            );
            inner.history.push_back(record);
            while inner.history.len() > self.config.history_capacity {
                inner.history.pop_front();
            }
        }

        evaluation
    }

    /// All keys currently in the violating state
    pub fn current_violations(&self) -> Vec<ActiveViolation> {
        let inner = self.inner.lock();
        let mut violations: Vec<ActiveViolation> = inner
            .states
            .iter()
            .filter(|(_, s)| s.is_violating)
            .map(|(key, s)| ActiveViolation {
                key: key.clone(),
                severity: s.current_severity,
                last_value: s.last_value,
                last_checked: s.last_checked,
            })
            .collect();
        violations.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.key.cmp(&b.key)));
        violations
    }

    /// Violations declared within the trailing `window_ms`, oldest first
    pub fn violation_history(&self, window_ms: i64) -> Vec<ViolationRecord> {
        let since = self.clock.now_ms() - window_ms;
        let inner = self.inner.lock();
        inner
            .history
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn metric_state(&self, key: &MetricKey) -> Option<MetricState> {
        self.inner.lock().states.get(key).cloned()
    }

    pub fn summary(&self) -> BudgetSummary {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();

        let active_violations = inner.states.values().filter(|s| s.is_violating).count();
        let critical_violations = inner
            .states
            .values()
            .filter(|s| s.is_violating && s.current_severity == Severity::Critical)
            .count();
        let since = |window: i64| {
            inner
                .history
                .iter()
                .filter(|r| r.timestamp >= now - window)
                .count()
        };

        BudgetSummary {
            active_violations,
            critical_violations,
            tracked_metrics: inner.states.len(),
            violations_last_15m: since(15 * MINUTE_MS),
            violations_last_hour: since(HOUR_MS),
        }
    }

    /// Forget all state and history
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.states.clear();
        inner.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const POOL: Thresholds = Thresholds::higher_is_bad(70.0, 90.0);

    fn engine() -> (Arc<ManualClock>, BudgetEngine) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let engine = BudgetEngine::new(clock.clone());
        (clock, engine)
    }

    #[test]
    fn test_single_breach_does_not_violate() {
        let (_, engine) = engine();

        let first = engine.evaluate("db.pool", 80.0, POOL, None);
        assert!(!first.violated);
        assert!(!first.new_violation);

        let cleared = engine.evaluate("db.pool", 10.0, POOL, None);
        assert!(!cleared.violated);
        assert!(engine.violation_history(HOUR_MS).is_empty());

        // The clear sample reset the breach counter
        let again = engine.evaluate("db.pool", 80.0, POOL, None);
        assert!(!again.violated);
    }

    #[test]
    fn test_two_breaches_declare_violation_once() {
        let (_, engine) = engine();

        let first = engine.evaluate("db.pool", 80.0, POOL, None);
        assert!(!first.new_violation);

        let second = engine.evaluate("db.pool", 80.0, POOL, None);
        assert!(second.violated);
        assert!(second.new_violation);
        assert_eq!(second.severity, Severity::Warn);

        let third = engine.evaluate("db.pool", 85.0, POOL, None);
        assert!(third.violated);
        assert!(!third.new_violation);

        let history = engine.violation_history(HOUR_MS);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].threshold, 70.0);
    }

    #[test]
    fn test_clear_requires_consecutive_samples() {
        let (_, engine) = engine();
        engine.evaluate("db.pool", 95.0, POOL, None);
        engine.evaluate("db.pool", 95.0, POOL, None);

        let one_clear = engine.evaluate("db.pool", 10.0, POOL, None);
        assert!(one_clear.violated);

        // A breach in between restarts the clear count
        engine.evaluate("db.pool", 95.0, POOL, None);
        let still = engine.evaluate("db.pool", 10.0, POOL, None);
        assert!(still.violated);

        let cleared = engine.evaluate("db.pool", 10.0, POOL, None);
        assert!(!cleared.violated);
        assert_eq!(cleared.severity, Severity::None);
    }

    #[test]
    fn test_escalation_is_immediate() {
        let (_, engine) = engine();
        engine.evaluate("db.pool", 75.0, POOL, None);
        let warn = engine.evaluate("db.pool", 75.0, POOL, None);
        assert_eq!(warn.severity, Severity::Warn);

        let critical = engine.evaluate("db.pool", 95.0, POOL, None);
        assert!(critical.violated);
        assert!(!critical.new_violation);
        assert_eq!(critical.severity, Severity::Critical);

        // No de-escalation while still violating
        let warn_again = engine.evaluate("db.pool", 75.0, POOL, None);
        assert_eq!(warn_again.severity, Severity::Critical);
    }

    #[test]
    fn test_lower_is_bad_direction() {
        let (_, engine) = engine();
        let hit_rate = Thresholds::lower_is_bad(0.60, 0.30);

        engine.evaluate("cache.hit_rate", 0.25, hit_rate, None);
        let result = engine.evaluate("cache.hit_rate", 0.25, hit_rate, None);
        assert!(result.violated);
        assert_eq!(result.severity, Severity::Critical);

        engine.reset();
        engine.evaluate("cache.hit_rate", 0.65, hit_rate, None);
        let healthy = engine.evaluate("cache.hit_rate", 0.65, hit_rate, None);
        assert!(!healthy.violated);
        let state = engine
            .metric_state(&MetricKey::new("cache.hit_rate"))
            .unwrap();
        assert_eq!(state.breach_count, 0);
        assert_eq!(state.clear_count, 2);
    }

    #[test]
    fn test_sub_keys_are_independent() {
        let (_, engine) = engine();
        let latency = Thresholds::higher_is_bad(500.0, 1500.0);

        engine.evaluate("api.endpoint_p95", 900.0, latency, Some("GET /a"));
        engine.evaluate("api.endpoint_p95", 900.0, latency, Some("GET /b"));
        let a = engine.evaluate("api.endpoint_p95", 900.0, latency, Some("GET /a"));
        assert!(a.new_violation);

        let b_state = engine
            .metric_state(&MetricKey::with_sub_key("api.endpoint_p95", "GET /b"))
            .unwrap();
        assert!(!b_state.is_violating);
        assert_eq!(engine.violation_history(HOUR_MS)[0].endpoint.as_deref(), Some("GET /a"));
    }

    #[test]
    fn test_non_finite_samples_are_ignored() {
        let (_, engine) = engine();
        engine.evaluate("db.pool", 95.0, POOL, None);
        let nan = engine.evaluate("db.pool", f64::NAN, POOL, None);
        assert!(!nan.violated);

        let state = engine.metric_state(&MetricKey::new("db.pool")).unwrap();
        assert_eq!(state.breach_count, 1);
        assert_eq!(state.last_value, 95.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let clock = Arc::new(ManualClock::new(0));
        let engine = BudgetEngine::with_config(
            clock,
            EngineConfig {
                breach_threshold: 1,
                clear_threshold: 1,
                history_capacity: 3,
            },
        );

        for _ in 0..5 {
            engine.evaluate("m", 95.0, POOL, None);
            engine.evaluate("m", 1.0, POOL, None);
        }

        assert_eq!(engine.violation_history(HOUR_MS).len(), 3);
    }

    #[test]
    fn test_summary_windows() {
        let (clock, engine) = engine();
        engine.evaluate("a", 95.0, POOL, None);
        engine.evaluate("a", 95.0, POOL, None);

        clock.advance_minutes(30);
        engine.evaluate("b", 75.0, POOL, None);
        engine.evaluate("b", 75.0, POOL, None);
        engine.evaluate("c", 10.0, POOL, None);

        let summary = engine.summary();
        assert_eq!(summary.tracked_metrics, 3);
        assert_eq!(summary.active_violations, 2);
        assert_eq!(summary.critical_violations, 1);
        assert_eq!(summary.violations_last_15m, 1);
        assert_eq!(summary.violations_last_hour, 2);

        let current = engine.current_violations();
        assert_eq!(current[0].key.metric, "a");

        engine.reset();
        assert_eq!(engine.summary(), BudgetSummary::default());
    }
}
