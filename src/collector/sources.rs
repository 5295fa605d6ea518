//! Collaborators the probes read from
//!
//! Each trait is a narrow adapter over a subsystem owned elsewhere in the
//! host process (connection pool, cache client, job queue, ...).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

/// Probe errors
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection pool counters plus recent query timings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub waiting_requests: u32,
    pub max_connections: u32,
    /// Durations of queries completed since the last call, in millis
    pub recent_query_ms: Vec<f64>,
}

impl PoolStats {
    /// Percent of the pool's capacity checked out
    pub fn saturation_pct(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        let in_use = self.total_connections.saturating_sub(self.idle_connections);
        in_use as f64 / self.max_connections as f64 * 100.0
    }
}

#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn pool_stats(&self) -> Result<PoolStats, ProbeError>;
}

/// Cumulative hit/miss counters as reported by the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[async_trait]
pub trait CacheProbe: Send + Sync {
    async fn ping(&self) -> Result<(), ProbeError>;
    async fn stats(&self) -> Result<CacheStats, ProbeError>;
}

#[async_trait]
pub trait ObjectStorageProbe: Send + Sync {
    async fn ping(&self) -> Result<(), ProbeError>;
}

/// Upload/download outcome counters, incremented by the code that talks to
/// object storage and drained by the collector on every tick
#[derive(Debug, Default)]
pub struct ObjectStorageCounters {
    uploads: AtomicU64,
    upload_errors: AtomicU64,
    downloads: AtomicU64,
    download_errors: AtomicU64,
}

/// Counts drained from [`ObjectStorageCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferCounts {
    pub uploads: u64,
    pub upload_errors: u64,
    pub downloads: u64,
    pub download_errors: u64,
}

impl TransferCounts {
    pub fn operations(&self) -> u64 {
        self.uploads + self.downloads
    }

    pub fn errors(&self) -> u64 {
        self.upload_errors + self.download_errors
    }

    pub fn error_rate(&self) -> Option<f64> {
        match self.operations() {
            0 => None,
            ops => Some(self.errors() as f64 / ops as f64),
        }
    }
}

impl ObjectStorageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_upload(&self, ok: bool) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.upload_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_download(&self, ok: bool) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.download_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the counts accumulated since the previous drain
    pub fn drain(&self) -> TransferCounts {
        TransferCounts {
            uploads: self.uploads.swap(0, Ordering::Relaxed),
            upload_errors: self.upload_errors.swap(0, Ordering::Relaxed),
            downloads: self.downloads.swap(0, Ordering::Relaxed),
            download_errors: self.download_errors.swap(0, Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobQueueStats {
    pub pending: u64,
    pub processing: u64,
    pub success_rate: Option<f64>,
    pub failed_last_15m: u64,
    pub failed_last_24h: u64,
    pub oldest_pending_age_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningJob {
    pub job_type: String,
    pub age_ms: i64,
}

#[async_trait]
pub trait JobQueueStatusProvider: Send + Sync {
    async fn stats(&self) -> Result<JobQueueStats, ProbeError>;
    async fn running_jobs_with_age(&self) -> Result<Vec<RunningJob>, ProbeError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

#[async_trait]
pub trait StorageProbe: Send + Sync {
    async fn usage(&self) -> Result<DiskUsage, ProbeError>;
}
