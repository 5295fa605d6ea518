//! Snapshot payloads written by the collector and read by the evaluator

pub mod model;
pub mod stats;

pub use model::{
    ApiMetrics, CacheMetrics, DatabaseMetrics, EndpointStat, IntegrationCheckResult,
    IntegrationMetrics, JobQueueMetrics, MetricSnapshot, ObjectStorageMetrics, PortalMetrics,
    RouteStat, SnapshotMetrics, SnapshotType, StorageMetrics,
};
