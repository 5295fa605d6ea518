//! Client-reported portal metrics (route transitions and JS errors)

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::Deserialize;

use crate::snapshot::stats::percentile;
use crate::snapshot::{PortalMetrics, RouteStat};

const DEFAULT_CAPACITY: usize = 5_000;
const SLOW_ROUTE_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteTransition {
    pub route: String,
    pub duration_ms: f64,
    #[serde(default)]
    pub at: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsError {
    pub message: String,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub at: i64,
}

#[derive(Default)]
struct Buffers {
    transitions: VecDeque<RouteTransition>,
    errors: VecDeque<JsError>,
}

/// Bounded buffer of metrics reported by browser clients
pub struct PortalMetricsBuffer {
    inner: Mutex<Buffers>,
    capacity: usize,
}

impl PortalMetricsBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Buffers::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn record_route_transition(&self, transition: RouteTransition) {
        if !transition.duration_ms.is_finite() || transition.duration_ms < 0.0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.transitions.push_back(transition);
        while inner.transitions.len() > self.capacity {
            inner.transitions.pop_front();
        }
    }

    pub fn record_js_error(&self, error: JsError) {
        let mut inner = self.inner.lock();
        inner.errors.push_back(error);
        while inner.errors.len() > self.capacity {
            inner.errors.pop_front();
        }
    }

    /// Aggregate everything reported at or after `since`
    pub fn summarize(&self, since: i64, window_minutes: u32) -> PortalMetrics {
        let inner = self.inner.lock();

        let mut durations = Vec::new();
        let mut by_route: HashMap<&str, Vec<f64>> = HashMap::new();
        for t in inner.transitions.iter().filter(|t| t.at >= since) {
            durations.push(t.duration_ms);
            by_route.entry(t.route.as_str()).or_default().push(t.duration_ms);
        }

        let mut slow_routes: Vec<RouteStat> = by_route
            .into_iter()
            .map(|(route, samples)| RouteStat {
                route: route.to_string(),
                count: samples.len(),
                p95_ms: percentile(&samples, 95.0).unwrap_or(0.0),
            })
            .collect();
        slow_routes.sort_by(|a, b| b.p95_ms.total_cmp(&a.p95_ms).then_with(|| a.route.cmp(&b.route)));
        slow_routes.truncate(SLOW_ROUTE_LIMIT);

        PortalMetrics {
            window_minutes,
            route_samples: durations.len(),
            route_p95_ms: percentile(&durations, 95.0),
            js_error_count: inner.errors.iter().filter(|e| e.at >= since).count(),
            slow_routes,
        }
    }
}

impl Default for PortalMetricsBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(route: &str, duration_ms: f64, at: i64) -> RouteTransition {
        RouteTransition {
            route: route.to_string(),
            duration_ms,
            at,
        }
    }

    #[test]
    fn test_summarize_window_and_slow_routes() {
        let buffer = PortalMetricsBuffer::new();
        buffer.record_route_transition(transition("/dashboard", 100.0, 0));
        buffer.record_route_transition(transition("/dashboard", 200.0, 1_000));
        buffer.record_route_transition(transition("/reports", 4_000.0, 1_000));
        buffer.record_route_transition(transition("/bad", f64::NAN, 1_000));
        buffer.record_js_error(JsError {
            message: "TypeError".to_string(),
            route: Some("/reports".to_string()),
            at: 1_000,
        });
        buffer.record_js_error(JsError {
            message: "old".to_string(),
            route: None,
            at: 0,
        });

        let metrics = buffer.summarize(500, 15);
        assert_eq!(metrics.route_samples, 2);
        assert_eq!(metrics.route_p95_ms, Some(4_000.0));
        assert_eq!(metrics.js_error_count, 1);
        assert_eq!(metrics.slow_routes[0].route, "/reports");
    }

    #[test]
    fn test_capacity() {
        let buffer = PortalMetricsBuffer::with_capacity(2);
        for i in 0..4 {
            buffer.record_route_transition(transition("/r", i as f64, i));
        }
        assert_eq!(buffer.summarize(0, 15).route_samples, 2);
    }
}
