//! Liveness checks against third-party dependencies

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::sources::ProbeError;
use crate::snapshot::stats::percentile;
use crate::snapshot::{IntegrationCheckResult, IntegrationMetrics};
use crate::store::{IntegrationHealthRecord, IntegrationStatus};

/// Checks kept per integration for latency p95 and error rate
const HISTORY_LEN: usize = 20;
/// Error rate over recent checks at which a reachable integration is degraded
pub const DEGRADED_ERROR_RATE: f64 = 0.2;

/// Result of a successful liveness check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub latency_ms: f64,
    /// Reachable but answering slowly or with a soft failure
    pub degraded: bool,
    pub detail: Option<String>,
}

#[async_trait]
pub trait IntegrationCheck: Send + Sync {
    fn name(&self) -> &str;

    /// False when no endpoint or credentials are configured
    fn is_configured(&self) -> bool;

    async fn check(&self) -> Result<CheckOutcome, ProbeError>;
}

/// GET-based liveness check
pub struct HttpIntegrationCheck {
    name: String,
    url: Option<String>,
    http_client: reqwest::Client,
    slow_threshold: Duration,
}

impl HttpIntegrationCheck {
    pub fn new(name: impl Into<String>, url: Option<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            url: url.filter(|u| !u.trim().is_empty()),
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            slow_threshold: Duration::from_secs(2),
        }
    }

    pub fn with_slow_threshold(mut self, slow_threshold: Duration) -> Self {
        self.slow_threshold = slow_threshold;
        self
    }
}

#[async_trait]
impl IntegrationCheck for HttpIntegrationCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    async fn check(&self) -> Result<CheckOutcome, ProbeError> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| ProbeError::Unavailable("not configured".to_string()))?;

        let started = Instant::now();
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ProbeError::Http(e.to_string()))?;
        let elapsed = started.elapsed();
        let status = response.status();

        if status.is_server_error() {
            return Err(ProbeError::Http(format!("status {}", status)));
        }

        // 401/403 still prove the endpoint is up; other 4xx are soft failures
        let soft_failure = status.is_client_error()
            && status != reqwest::StatusCode::UNAUTHORIZED
            && status != reqwest::StatusCode::FORBIDDEN;
        let slow = elapsed > self.slow_threshold;

        Ok(CheckOutcome {
            latency_ms: elapsed.as_secs_f64() * 1000.0,
            degraded: soft_failure || slow,
            detail: if soft_failure {
                Some(format!("status {}", status))
            } else if slow {
                Some(format!("slow response ({} ms)", elapsed.as_millis()))
            } else {
                None
            },
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct CheckSample {
    ok: bool,
    latency_ms: Option<f64>,
}

#[derive(Debug, Default)]
struct IntegrationHistory {
    samples: VecDeque<CheckSample>,
    last_success_at: Option<i64>,
    last_failure_at: Option<i64>,
    last_failure_reason: Option<String>,
}

/// Runs every configured check concurrently and folds results into
/// per-integration health records
pub struct IntegrationMonitor {
    checks: Vec<Arc<dyn IntegrationCheck>>,
    timeout: Duration,
    history: Mutex<HashMap<String, IntegrationHistory>>,
}

impl IntegrationMonitor {
    pub fn new(checks: Vec<Arc<dyn IntegrationCheck>>, timeout: Duration) -> Self {
        Self {
            checks,
            timeout,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Check every integration once
    pub async fn run(&self, now: i64) -> (IntegrationMetrics, Vec<IntegrationHealthRecord>) {
        let futures: Vec<_> = self
            .checks
            .iter()
            .map(|check| async move {
                if !check.is_configured() {
                    return (check.name().to_string(), None);
                }
                let outcome = match tokio::time::timeout(self.timeout, check.check()).await {
                    Ok(result) => result,
                    Err(_) => Err(ProbeError::Timeout(self.timeout)),
                };
                (check.name().to_string(), Some(outcome))
            })
            .collect();

        let outcomes = futures::future::join_all(futures).await;

        let mut metrics = IntegrationMetrics::default();
        let mut records = Vec::with_capacity(outcomes.len());
        let mut history = self.history.lock();

        for (name, outcome) in outcomes {
            let (result, record) = match outcome {
                None => not_configured(&name, now),
                Some(outcome) => {
                    let entry = history.entry(name.clone()).or_default();
                    fold_outcome(entry, &name, outcome, now)
                }
            };

            match result.status {
                IntegrationStatus::Healthy => metrics.healthy += 1,
                IntegrationStatus::Degraded => metrics.degraded += 1,
                IntegrationStatus::Down => metrics.down += 1,
                IntegrationStatus::NotConfigured => {}
            }
            metrics.integrations.push(result);
            records.push(record);
        }

        (metrics, records)
    }
}

fn not_configured(name: &str, now: i64) -> (IntegrationCheckResult, IntegrationHealthRecord) {
    (
        IntegrationCheckResult {
            name: name.to_string(),
            status: IntegrationStatus::NotConfigured,
            latency_ms: None,
            error: None,
        },
        IntegrationHealthRecord {
            integration_name: name.to_string(),
            status: IntegrationStatus::NotConfigured,
            latency_p95_ms: None,
            error_rate: 0.0,
            last_success_at: None,
            last_failure_at: None,
            last_failure_reason: None,
            checked_at: now,
        },
    )
}

fn fold_outcome(
    history: &mut IntegrationHistory,
    name: &str,
    outcome: Result<CheckOutcome, ProbeError>,
    now: i64,
) -> (IntegrationCheckResult, IntegrationHealthRecord) {
    let (sample, degraded, error) = match &outcome {
        Ok(o) => {
            history.last_success_at = Some(now);
            if o.degraded {
                history.last_failure_reason = o.detail.clone();
            }
            (
                CheckSample {
                    ok: true,
                    latency_ms: Some(o.latency_ms),
                },
                o.degraded,
                o.detail.clone(),
            )
        }
        Err(e) => {
            tracing::warn!(integration = %name, error = %e, "Integration check failed");
            history.last_failure_at = Some(now);
            history.last_failure_reason = Some(e.to_string());
            (
                CheckSample {
                    ok: false,
                    latency_ms: None,
                },
                false,
                Some(e.to_string()),
            )
        }
    };

    history.samples.push_back(sample);
    while history.samples.len() > HISTORY_LEN {
        history.samples.pop_front();
    }

    let failures = history.samples.iter().filter(|s| !s.ok).count();
    let error_rate = failures as f64 / history.samples.len() as f64;
    let latencies: Vec<f64> = history.samples.iter().filter_map(|s| s.latency_ms).collect();

    let status = if !sample.ok {
        IntegrationStatus::Down
    } else if degraded || error_rate >= DEGRADED_ERROR_RATE {
        IntegrationStatus::Degraded
    } else {
        IntegrationStatus::Healthy
    };

    (
        IntegrationCheckResult {
            name: name.to_string(),
            status,
            latency_ms: sample.latency_ms,
            error,
        },
        IntegrationHealthRecord {
            integration_name: name.to_string(),
            status,
            latency_p95_ms: percentile(&latencies, 95.0),
            error_rate,
            last_success_at: history.last_success_at,
            last_failure_at: history.last_failure_at,
            last_failure_reason: history.last_failure_reason.clone(),
            checked_at: now,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted check: fails on the listed call numbers
    struct ScriptedCheck {
        name: &'static str,
        configured: bool,
        fail_on: Vec<usize>,
        hang: bool,
        calls: AtomicUsize,
    }

    impl ScriptedCheck {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                configured: true,
                fail_on: vec![],
                hang: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IntegrationCheck for ScriptedCheck {
        fn name(&self) -> &str {
            self.name
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn check(&self) -> Result<CheckOutcome, ProbeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail_on.contains(&call) {
                return Err(ProbeError::Http("status 502 Bad Gateway".to_string()));
            }
            Ok(CheckOutcome {
                latency_ms: 40.0,
                degraded: false,
                detail: None,
            })
        }
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut flaky = ScriptedCheck::new("carrier-api");
        flaky.fail_on = vec![1];
        let mut missing = ScriptedCheck::new("crm");
        missing.configured = false;

        let monitor = IntegrationMonitor::new(
            vec![Arc::new(flaky), Arc::new(missing), Arc::new(ScriptedCheck::new("email"))],
            Duration::from_secs(1),
        );

        let (metrics, records) = monitor.run(1_000).await;
        assert_eq!(metrics.healthy, 2);
        assert_eq!(records[1].status, IntegrationStatus::NotConfigured);

        let (metrics, records) = monitor.run(2_000).await;
        assert_eq!(metrics.down, 1);
        let carrier = &records[0];
        assert_eq!(carrier.status, IntegrationStatus::Down);
        assert_eq!(carrier.last_success_at, Some(1_000));
        assert_eq!(carrier.last_failure_at, Some(2_000));
        assert_eq!(carrier.error_rate, 0.5);
        assert!(carrier
            .last_failure_reason
            .as_deref()
            .unwrap()
            .contains("502"));

        // Recovered, but half the recent checks failed
        let (_, records) = monitor.run(3_000).await;
        assert_eq!(records[0].status, IntegrationStatus::Degraded);
        assert_eq!(records[0].latency_p95_ms, Some(40.0));
    }

    #[tokio::test]
    async fn test_hanging_check_times_out() {
        let mut hanging = ScriptedCheck::new("slow-vendor");
        hanging.hang = true;
        let monitor = IntegrationMonitor::new(
            vec![Arc::new(hanging), Arc::new(ScriptedCheck::new("fast-vendor"))],
            Duration::from_millis(50),
        );

        let (metrics, records) = monitor.run(1_000).await;
        assert_eq!(metrics.down, 1);
        assert_eq!(metrics.healthy, 1);
        assert!(records[0]
            .last_failure_reason
            .as_deref()
            .unwrap()
            .starts_with("Timed out"));
    }

    #[test]
    fn test_http_check_without_url_is_not_configured() {
        let check = HttpIntegrationCheck::new("sms", Some("  ".to_string()), Duration::from_secs(1));
        assert!(!check.is_configured());
        assert_eq!(check.name(), "sms");
    }
}
