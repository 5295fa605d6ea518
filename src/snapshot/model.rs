//! Typed snapshot payloads, one struct per probe kind

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::IntegrationStatus;

/// Subsystem a snapshot was collected from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    Api,
    Database,
    Cache,
    ObjectStorage,
    JobQueue,
    Integration,
    Portal,
    Storage,
}

impl SnapshotType {
    pub const ALL: [SnapshotType; 8] = [
        SnapshotType::Api,
        SnapshotType::Database,
        SnapshotType::Cache,
        SnapshotType::ObjectStorage,
        SnapshotType::JobQueue,
        SnapshotType::Integration,
        SnapshotType::Portal,
        SnapshotType::Storage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotType::Api => "api",
            SnapshotType::Database => "database",
            SnapshotType::Cache => "cache",
            SnapshotType::ObjectStorage => "object_storage",
            SnapshotType::JobQueue => "job_queue",
            SnapshotType::Integration => "integration",
            SnapshotType::Portal => "portal",
            SnapshotType::Storage => "storage",
        }
    }
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SnapshotType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown snapshot type: {}", s))
    }
}

/// Per-endpoint breakdown row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStat {
    pub endpoint: String,
    pub count: usize,
    pub error_count: usize,
    pub p95_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiMetrics {
    pub window_minutes: u32,
    pub request_count: usize,
    pub error_count: usize,
    /// Percent of requests answered with a 5xx status
    pub error_rate_pct: f64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub top_endpoints: Vec<EndpointStat>,
    pub slow_endpoints: Vec<EndpointStat>,
    pub error_endpoints: Vec<EndpointStat>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetrics {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub waiting_requests: u32,
    pub max_connections: u32,
    /// Percent of `max_connections` currently checked out
    pub pool_saturation_pct: f64,
    pub query_p95_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// `None` below the minimum operation count for a meaningful ratio
    pub hit_rate: Option<f64>,
    pub ping_latency_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStorageMetrics {
    pub reachable: bool,
    pub ping_latency_ms: Option<f64>,
    pub uploads: u64,
    pub upload_errors: u64,
    pub downloads: u64,
    pub download_errors: u64,
    /// Ratio of failed operations since the previous tick; `None` below
    /// the minimum operation count
    pub error_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobQueueMetrics {
    pub pending: u64,
    pub processing: u64,
    pub success_rate: Option<f64>,
    pub failed_last_15m: u64,
    pub failed_last_24h: u64,
    pub oldest_pending_age_ms: Option<i64>,
    pub stuck_jobs: usize,
    pub stuck_job_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationCheckResult {
    pub name: String,
    pub status: IntegrationStatus,
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationMetrics {
    pub integrations: Vec<IntegrationCheckResult>,
    pub healthy: usize,
    pub degraded: usize,
    pub down: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStat {
    pub route: String,
    pub count: usize,
    pub p95_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortalMetrics {
    pub window_minutes: u32,
    pub route_samples: usize,
    /// `None` below the minimum route sample count
    pub route_p95_ms: Option<f64>,
    pub js_error_count: usize,
    pub slow_routes: Vec<RouteStat>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageMetrics {
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub usage_pct: f64,
}

/// Payload of a snapshot, tagged by its kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotMetrics {
    Api(ApiMetrics),
    Database(DatabaseMetrics),
    Cache(CacheMetrics),
    ObjectStorage(ObjectStorageMetrics),
    JobQueue(JobQueueMetrics),
    Integration(IntegrationMetrics),
    Portal(PortalMetrics),
    Storage(StorageMetrics),
}

impl SnapshotMetrics {
    pub fn snapshot_type(&self) -> SnapshotType {
        match self {
            SnapshotMetrics::Api(_) => SnapshotType::Api,
            SnapshotMetrics::Database(_) => SnapshotType::Database,
            SnapshotMetrics::Cache(_) => SnapshotType::Cache,
            SnapshotMetrics::ObjectStorage(_) => SnapshotType::ObjectStorage,
            SnapshotMetrics::JobQueue(_) => SnapshotType::JobQueue,
            SnapshotMetrics::Integration(_) => SnapshotType::Integration,
            SnapshotMetrics::Portal(_) => SnapshotType::Portal,
            SnapshotMetrics::Storage(_) => SnapshotType::Storage,
        }
    }

    pub fn as_api(&self) -> Option<&ApiMetrics> {
        match self {
            SnapshotMetrics::Api(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_database(&self) -> Option<&DatabaseMetrics> {
        match self {
            SnapshotMetrics::Database(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_cache(&self) -> Option<&CacheMetrics> {
        match self {
            SnapshotMetrics::Cache(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object_storage(&self) -> Option<&ObjectStorageMetrics> {
        match self {
            SnapshotMetrics::ObjectStorage(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_job_queue(&self) -> Option<&JobQueueMetrics> {
        match self {
            SnapshotMetrics::JobQueue(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_portal(&self) -> Option<&PortalMetrics> {
        match self {
            SnapshotMetrics::Portal(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_storage(&self) -> Option<&StorageMetrics> {
        match self {
            SnapshotMetrics::Storage(m) => Some(m),
            _ => None,
        }
    }
}

/// One probe's output for one collection tick. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub snapshot_type: SnapshotType,
    pub metrics: SnapshotMetrics,
    /// Unix millis of the tick that produced it
    pub collected_at: i64,
}

impl MetricSnapshot {
    pub fn new(metrics: SnapshotMetrics, collected_at: i64) -> Self {
        Self {
            snapshot_type: metrics.snapshot_type(),
            metrics,
            collected_at,
        }
    }
}
