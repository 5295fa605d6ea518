//! Budgets the collector evaluates directly on every tick

use super::types::Thresholds;

pub const DB_POOL_SATURATION: &str = "db.pool_saturation";
pub const JOB_QUEUE_STUCK_JOBS: &str = "job_queue.stuck_jobs";
pub const CACHE_HIT_RATE: &str = "cache.hit_rate";
pub const OBJECT_STORAGE_ERROR_RATE: &str = "object_storage.error_rate";
pub const PORTAL_ROUTE_P95: &str = "portal.route_p95_ms";
pub const API_ENDPOINT_P95: &str = "api.endpoint_p95_ms";

/// Thresholds and minimum sample sizes for probe-level budgets
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeBudgets {
    /// Percent of max connections in use
    pub pool_saturation: Thresholds,
    pub stuck_jobs: Thresholds,
    /// Ratio in 0..=1
    pub cache_hit_rate: Thresholds,
    pub cache_min_operations: u64,
    /// Ratio in 0..=1
    pub object_storage_error_rate: Thresholds,
    pub object_storage_min_operations: u64,
    pub portal_route_p95_ms: Thresholds,
    pub portal_min_samples: usize,
    pub endpoint_p95_ms: Thresholds,
    pub endpoint_min_requests: usize,
}

impl Default for RealtimeBudgets {
    fn default() -> Self {
        Self {
            pool_saturation: Thresholds::higher_is_bad(70.0, 90.0),
            stuck_jobs: Thresholds::higher_is_bad(1.0, 5.0),
            cache_hit_rate: Thresholds::lower_is_bad(0.60, 0.30),
            cache_min_operations: 10,
            object_storage_error_rate: Thresholds::higher_is_bad(0.05, 0.20),
            object_storage_min_operations: 10,
            portal_route_p95_ms: Thresholds::higher_is_bad(1_000.0, 3_000.0),
            portal_min_samples: 5,
            endpoint_p95_ms: Thresholds::higher_is_bad(1_000.0, 3_000.0),
            endpoint_min_requests: 20,
        }
    }
}
