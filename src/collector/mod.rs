//! Periodic metrics collection
//!
//! Probes read from narrow source traits, one snapshot per probe per tick.

pub mod integrations;
pub mod jobs;
pub mod metrics_collector;
pub mod portal;
pub mod request_log;
pub mod sources;
pub mod storage;

pub use integrations::{
    CheckOutcome, HttpIntegrationCheck, IntegrationCheck, IntegrationMonitor, DEGRADED_ERROR_RATE,
};
pub use jobs::StuckJobPolicy;
pub use metrics_collector::{CollectionReport, CollectorConfig, MetricsCollector};
pub use portal::{JsError, PortalMetricsBuffer, RouteTransition};
pub use request_log::{normalize_path, RequestLog, RequestTiming};
pub use sources::{
    CacheProbe, CacheStats, DatabaseProbe, DiskUsage, JobQueueStats, JobQueueStatusProvider,
    ObjectStorageCounters, ObjectStorageProbe, PoolStats, ProbeError, RunningJob, StorageProbe,
    TransferCounts,
};
pub use storage::DirectoryUsageProbe;
