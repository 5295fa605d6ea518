//! Ring buffer of recent request timings feeding the API probe

use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::Regex;

use crate::snapshot::stats::percentile;
use crate::snapshot::{ApiMetrics, EndpointStat};

const DEFAULT_CAPACITY: usize = 10_000;
const BREAKDOWN_LIMIT: usize = 10;

/// One completed request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTiming {
    /// Method plus normalized path, e.g. `GET /api/alerts/:id`
    pub endpoint: String,
    pub status: u16,
    pub duration_ms: f64,
    /// Unix millis at completion
    pub at: i64,
}

impl RequestTiming {
    pub fn new(method: &str, path: &str, status: u16, duration_ms: f64, at: i64) -> Self {
        Self {
            endpoint: format!("{} {}", method, normalize_path(path)),
            status,
            duration_ms,
            at,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status >= 500
    }
}

/// Collapse id-like path segments so breakdowns group by route
pub fn normalize_path(path: &str) -> String {
    static ID_SEGMENT: OnceLock<Regex> = OnceLock::new();
    let re = ID_SEGMENT.get_or_init(|| {
        Regex::new(r"^(\d+|[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})$")
            .expect("static regex")
    });

    let path = path.split('?').next().unwrap_or(path);
    let normalized: Vec<&str> = path
        .split('/')
        .map(|segment| if re.is_match(segment) { ":id" } else { segment })
        .collect();
    normalized.join("/")
}

/// Bounded, thread-safe log of recent requests
pub struct RequestLog {
    entries: Mutex<VecDeque<RequestTiming>>,
    capacity: usize,
}

impl RequestLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, timing: RequestTiming) {
        let mut entries = self.entries.lock();
        entries.push_back(timing);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests completed at or after `since`
    pub fn since(&self, since: i64) -> Vec<RequestTiming> {
        self.entries
            .lock()
            .iter()
            .filter(|t| t.at >= since)
            .cloned()
            .collect()
    }

    /// Per-endpoint breakdown of requests completed at or after `since`
    pub fn endpoint_stats(&self, since: i64) -> Vec<EndpointStat> {
        breakdown(&self.since(since))
    }

    /// Aggregate the trailing window into API metrics
    pub fn summarize(&self, since: i64, window_minutes: u32) -> ApiMetrics {
        let window = self.since(since);
        if window.is_empty() {
            return ApiMetrics {
                window_minutes,
                ..Default::default()
            };
        }

        let durations: Vec<f64> = window.iter().map(|t| t.duration_ms).collect();
        let error_count = window.iter().filter(|t| t.is_error()).count();
        let endpoints = breakdown(&window);
        let erroring: Vec<EndpointStat> = endpoints
            .iter()
            .filter(|e| e.error_count > 0)
            .cloned()
            .collect();

        ApiMetrics {
            window_minutes,
            request_count: window.len(),
            error_count,
            error_rate_pct: error_count as f64 * 100.0 / window.len() as f64,
            p50_ms: percentile(&durations, 50.0),
            p95_ms: percentile(&durations, 95.0),
            p99_ms: percentile(&durations, 99.0),
            top_endpoints: top_by(&endpoints, |e| e.count as f64),
            slow_endpoints: top_by(&endpoints, |e| e.p95_ms),
            error_endpoints: top_by(&erroring, |e| e.error_count as f64),
        }
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new()
    }
}

fn breakdown(window: &[RequestTiming]) -> Vec<EndpointStat> {
    let mut by_endpoint: HashMap<&str, (Vec<f64>, usize)> = HashMap::new();
    for timing in window {
        let entry = by_endpoint.entry(timing.endpoint.as_str()).or_default();
        entry.0.push(timing.duration_ms);
        if timing.is_error() {
            entry.1 += 1;
        }
    }

    by_endpoint
        .into_iter()
        .map(|(endpoint, (durations, errors))| EndpointStat {
            endpoint: endpoint.to_string(),
            count: durations.len(),
            error_count: errors,
            p95_ms: percentile(&durations, 95.0).unwrap_or(0.0),
        })
        .collect()
}

fn top_by(endpoints: &[EndpointStat], key: impl Fn(&EndpointStat) -> f64) -> Vec<EndpointStat> {
    let mut sorted = endpoints.to_vec();
    sorted.sort_by(|a, b| {
        key(b)
            .total_cmp(&key(a))
            .then_with(|| a.endpoint.cmp(&b.endpoint))
    });
    sorted.truncate(BREAKDOWN_LIMIT);
    sorted
}
