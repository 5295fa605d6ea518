//! Periodic fan-out over subsystem probes

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{self, MissedTickBehavior};

use super::integrations::{IntegrationCheck, IntegrationMonitor};
use super::jobs::StuckJobPolicy;
use super::portal::PortalMetricsBuffer;
use super::request_log::RequestLog;
use super::sources::{
    CacheProbe, CacheStats, DatabaseProbe, JobQueueStatusProvider, ObjectStorageCounters,
    ObjectStorageProbe, ProbeError, StorageProbe,
};
use crate::budget::realtime::{
    API_ENDPOINT_P95, CACHE_HIT_RATE, DB_POOL_SATURATION, JOB_QUEUE_STUCK_JOBS,
    OBJECT_STORAGE_ERROR_RATE, PORTAL_ROUTE_P95,
};
use crate::budget::{BudgetEngine, RealtimeBudgets};
use crate::clock::{Clock, MINUTE_MS};
use crate::guard::BusyGuard;
use crate::snapshot::stats::percentile;
use crate::snapshot::{
    CacheMetrics, DatabaseMetrics, IntegrationMetrics, JobQueueMetrics, MetricSnapshot,
    ObjectStorageMetrics, SnapshotMetrics, SnapshotType, StorageMetrics,
};
use crate::store::{IntegrationHealthRecord, Store, StoreError};

/// Collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Time between collection ticks
    pub interval: Duration,
    /// Upper bound on a single probe call
    pub probe_timeout: Duration,
    /// Trailing window aggregated by the API and portal probes
    pub window_minutes: u32,
    pub stuck_jobs: StuckJobPolicy,
    pub budgets: RealtimeBudgets,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            window_minutes: 15,
            stuck_jobs: StuckJobPolicy::default(),
            budgets: RealtimeBudgets::default(),
        }
    }
}

impl CollectorConfig {
    /// Slower cadence for dev and low-traffic deployments
    pub fn low_traffic() -> Self {
        Self {
            interval: Duration::from_secs(300),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Collected,
    Skipped,
    Failed,
}

/// What one collection cycle produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub collected_at: i64,
    pub collected: Vec<SnapshotType>,
    /// Probes with no configured source
    pub skipped: Vec<SnapshotType>,
    /// Probes that errored or timed out
    pub failed: Vec<SnapshotType>,
}

type ProbeResult = Result<Option<SnapshotMetrics>, ProbeError>;

/// Runs every probe concurrently once per tick, persists one snapshot per
/// successful probe, and feeds probe-level budgets into the engine.
///
/// Ticks never overlap: a tick that fires while the previous one is still
/// running is skipped, not queued.
pub struct MetricsCollector {
    store: Arc<dyn Store>,
    engine: Arc<BudgetEngine>,
    clock: Arc<dyn Clock>,
    config: CollectorConfig,

    database: Option<Arc<dyn DatabaseProbe>>,
    cache: Option<Arc<dyn CacheProbe>>,
    object_storage: Option<Arc<dyn ObjectStorageProbe>>,
    job_queue: Option<Arc<dyn JobQueueStatusProvider>>,
    storage: Option<Arc<dyn StorageProbe>>,
    integrations: IntegrationMonitor,

    request_log: Arc<RequestLog>,
    portal: Arc<PortalMetricsBuffer>,
    transfers: Arc<ObjectStorageCounters>,

    previous_cache_stats: Mutex<Option<CacheStats>>,
    latest: DashMap<SnapshotType, MetricSnapshot>,
    last_collection: Mutex<Option<i64>>,
    is_collecting: AtomicBool,
    is_refreshing_integrations: AtomicBool,
    running: Arc<AtomicBool>,
}

impl MetricsCollector {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<BudgetEngine>,
        clock: Arc<dyn Clock>,
        config: CollectorConfig,
    ) -> Self {
        let probe_timeout = config.probe_timeout;
        Self {
            store,
            engine,
            clock,
            config,
            database: None,
            cache: None,
            object_storage: None,
            job_queue: None,
            storage: None,
            integrations: IntegrationMonitor::new(Vec::new(), probe_timeout),
            request_log: Arc::new(RequestLog::new()),
            portal: Arc::new(PortalMetricsBuffer::new()),
            transfers: Arc::new(ObjectStorageCounters::new()),
            previous_cache_stats: Mutex::new(None),
            latest: DashMap::new(),
            last_collection: Mutex::new(None),
            is_collecting: AtomicBool::new(false),
            is_refreshing_integrations: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_database_probe(mut self, probe: Arc<dyn DatabaseProbe>) -> Self {
        self.database = Some(probe);
        self
    }

    pub fn with_cache_probe(mut self, probe: Arc<dyn CacheProbe>) -> Self {
        self.cache = Some(probe);
        self
    }

    pub fn with_object_storage_probe(mut self, probe: Arc<dyn ObjectStorageProbe>) -> Self {
        self.object_storage = Some(probe);
        self
    }

    pub fn with_job_queue(mut self, provider: Arc<dyn JobQueueStatusProvider>) -> Self {
        self.job_queue = Some(provider);
        self
    }

    pub fn with_storage_probe(mut self, probe: Arc<dyn StorageProbe>) -> Self {
        self.storage = Some(probe);
        self
    }

    pub fn with_integration_checks(mut self, checks: Vec<Arc<dyn IntegrationCheck>>) -> Self {
        self.integrations = IntegrationMonitor::new(checks, self.config.probe_timeout);
        self
    }

    /// Buffer the HTTP layer records request timings into
    pub fn request_log(&self) -> Arc<RequestLog> {
        Arc::clone(&self.request_log)
    }

    /// Buffer for client-reported portal metrics
    pub fn portal_buffer(&self) -> Arc<PortalMetricsBuffer> {
        Arc::clone(&self.portal)
    }

    /// Counters object-storage callers report transfer outcomes into
    pub fn transfer_counters(&self) -> Arc<ObjectStorageCounters> {
        Arc::clone(&self.transfers)
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Start the periodic collection loop
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Metrics collector started with interval {:?}", self.config.interval);

            let mut interval = time::interval(self.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                // Run the cycle detached so a slow cycle shows up as a
                // skipped tick instead of silently stretching the cadence
                let collector = Arc::clone(&self);
                tokio::spawn(async move {
                    collector.collect_once().await;
                });
            }

            tracing::info!("Metrics collector stopped");
        })
    }

    /// Stop the loop after its current tick
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one collection cycle. Returns `None` when a cycle is already in
    /// progress.
    pub async fn collect_once(&self) -> Option<CollectionReport> {
        let Some(_busy) = BusyGuard::try_acquire(&self.is_collecting) else {
            tracing::warn!("Previous collection still running, skipping tick");
            return None;
        };

        let now = self.clock.now_ms();
        let started = Instant::now();

        let (api, database, cache, object_storage, job_queue, integration, portal, storage) = tokio::join!(
            self.run_probe(SnapshotType::Api, now, self.probe_api(now)),
            self.run_probe(SnapshotType::Database, now, self.probe_database()),
            self.run_probe(SnapshotType::Cache, now, self.probe_cache()),
            self.run_probe(SnapshotType::ObjectStorage, now, self.probe_object_storage()),
            self.run_probe(SnapshotType::JobQueue, now, self.probe_job_queue()),
            self.run_probe(SnapshotType::Integration, now, self.probe_integrations(now)),
            self.run_probe(SnapshotType::Portal, now, self.probe_portal(now)),
            self.run_probe(SnapshotType::Storage, now, self.probe_storage()),
        );

        let mut report = CollectionReport {
            collected_at: now,
            ..Default::default()
        };
        for (snapshot_type, outcome) in [
            (SnapshotType::Api, api),
            (SnapshotType::Database, database),
            (SnapshotType::Cache, cache),
            (SnapshotType::ObjectStorage, object_storage),
            (SnapshotType::JobQueue, job_queue),
            (SnapshotType::Integration, integration),
            (SnapshotType::Portal, portal),
            (SnapshotType::Storage, storage),
        ] {
            match outcome {
                ProbeOutcome::Collected => report.collected.push(snapshot_type),
                ProbeOutcome::Skipped => report.skipped.push(snapshot_type),
                ProbeOutcome::Failed => report.failed.push(snapshot_type),
            }
        }

        *self.last_collection.lock() = Some(now);

        tracing::debug!(
            collected = report.collected.len(),
            failed = report.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collection cycle finished"
        );

        Some(report)
    }

    /// Re-run only the integration checks. Guarded independently of the
    /// main cycle; returns `None` when a refresh is already running.
    pub async fn refresh_integration_health(&self) -> Option<Vec<IntegrationHealthRecord>> {
        let Some(_busy) = BusyGuard::try_acquire(&self.is_refreshing_integrations) else {
            tracing::info!("Integration refresh already running, skipping");
            return None;
        };

        let now = self.clock.now_ms();
        let (metrics, records) = self.check_integrations(now).await;
        if !metrics.integrations.is_empty() {
            self.persist(MetricSnapshot::new(SnapshotMetrics::Integration(metrics), now))
                .await;
        }
        Some(records)
    }

    /// Most recent snapshot produced by this process for a probe
    pub fn latest_snapshot(&self, snapshot_type: SnapshotType) -> Option<MetricSnapshot> {
        self.latest.get(&snapshot_type).map(|s| s.value().clone())
    }

    /// Stored snapshots of a type, newest first
    pub async fn snapshot_history(
        &self,
        snapshot_type: SnapshotType,
        limit: usize,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        self.store.recent_snapshots(snapshot_type, limit).await
    }

    pub fn last_collection_time(&self) -> Option<i64> {
        *self.last_collection.lock()
    }

    pub fn is_currently_collecting(&self) -> bool {
        self.is_collecting.load(Ordering::SeqCst)
    }

    async fn run_probe<F>(&self, snapshot_type: SnapshotType, collected_at: i64, probe: F) -> ProbeOutcome
    where
        F: Future<Output = ProbeResult>,
    {
        let result = match time::timeout(self.config.probe_timeout, probe).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.config.probe_timeout)),
        };

        match result {
            Ok(Some(metrics)) => {
                self.persist(MetricSnapshot::new(metrics, collected_at)).await;
                ProbeOutcome::Collected
            }
            Ok(None) => ProbeOutcome::Skipped,
            Err(e) => {
                tracing::warn!(probe = %snapshot_type, error = %e, "Probe failed");
                ProbeOutcome::Failed
            }
        }
    }

    async fn persist(&self, snapshot: MetricSnapshot) {
        let snapshot_type = snapshot.snapshot_type;
        self.latest.insert(snapshot_type, snapshot.clone());

        if let Err(e) = self.store.insert_snapshot(snapshot).await {
            tracing::error!(probe = %snapshot_type, error = %e, "Failed to persist snapshot");
        }
    }

    fn window_start(&self, now: i64) -> i64 {
        now - i64::from(self.config.window_minutes) * MINUTE_MS
    }

    async fn probe_api(&self, now: i64) -> ProbeResult {
        let since = self.window_start(now);
        let budgets = &self.config.budgets;

        for endpoint in self
            .request_log
            .endpoint_stats(since)
            .into_iter()
            .filter(|e| e.count >= budgets.endpoint_min_requests)
        {
            self.engine.evaluate(
                API_ENDPOINT_P95,
                endpoint.p95_ms,
                budgets.endpoint_p95_ms,
                Some(&endpoint.endpoint),
            );
        }

        Ok(Some(SnapshotMetrics::Api(
            self.request_log.summarize(since, self.config.window_minutes),
        )))
    }

    async fn probe_database(&self) -> ProbeResult {
        let Some(database) = &self.database else {
            return Ok(None);
        };

        let stats = database.pool_stats().await?;
        let saturation = stats.saturation_pct();
        self.engine.evaluate(
            DB_POOL_SATURATION,
            saturation,
            self.config.budgets.pool_saturation,
            None,
        );

        Ok(Some(SnapshotMetrics::Database(DatabaseMetrics {
            total_connections: stats.total_connections,
            idle_connections: stats.idle_connections,
            waiting_requests: stats.waiting_requests,
            max_connections: stats.max_connections,
            pool_saturation_pct: saturation,
            query_p95_ms: percentile(&stats.recent_query_ms, 95.0),
        })))
    }

    async fn probe_cache(&self) -> ProbeResult {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };

        let started = Instant::now();
        cache.ping().await?;
        let ping_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let current = cache.stats().await?;

        // Cache counters are cumulative; a drop means the cache restarted
        let delta = {
            let mut previous = self.previous_cache_stats.lock();
            let delta = match *previous {
                Some(p) if current.hits >= p.hits && current.misses >= p.misses => CacheStats {
                    hits: current.hits - p.hits,
                    misses: current.misses - p.misses,
                },
                _ => current,
            };
            *previous = Some(current);
            delta
        };

        // Below the minimum the rate stays unset so neither the engine nor
        // the catalog averages a cold-cache ratio
        let operations = delta.hits + delta.misses;
        let budgets = &self.config.budgets;
        let hit_rate = (operations > 0 && operations >= budgets.cache_min_operations)
            .then(|| delta.hits as f64 / operations as f64);
        match hit_rate {
            Some(rate) => {
                self.engine
                    .evaluate(CACHE_HIT_RATE, rate, budgets.cache_hit_rate, None);
            }
            None => tracing::debug!(operations, "Too few cache operations to evaluate hit rate"),
        }

        Ok(Some(SnapshotMetrics::Cache(CacheMetrics {
            hits: delta.hits,
            misses: delta.misses,
            hit_rate,
            ping_latency_ms,
        })))
    }

    async fn probe_object_storage(&self) -> ProbeResult {
        let Some(object_storage) = &self.object_storage else {
            return Ok(None);
        };

        let started = Instant::now();
        let (reachable, ping_latency_ms) = match object_storage.ping().await {
            Ok(()) => (true, Some(started.elapsed().as_secs_f64() * 1000.0)),
            Err(e) => {
                tracing::warn!(error = %e, "Object storage ping failed");
                (false, None)
            }
        };

        let counts = self.transfers.drain();
        let budgets = &self.config.budgets;
        let error_rate = counts
            .error_rate()
            .filter(|_| counts.operations() >= budgets.object_storage_min_operations);
        if let Some(rate) = error_rate {
            self.engine.evaluate(
                OBJECT_STORAGE_ERROR_RATE,
                rate,
                budgets.object_storage_error_rate,
                None,
            );
        }

        Ok(Some(SnapshotMetrics::ObjectStorage(ObjectStorageMetrics {
            reachable,
            ping_latency_ms,
            uploads: counts.uploads,
            upload_errors: counts.upload_errors,
            downloads: counts.downloads,
            download_errors: counts.download_errors,
            error_rate,
        })))
    }

    async fn probe_job_queue(&self) -> ProbeResult {
        let Some(job_queue) = &self.job_queue else {
            return Ok(None);
        };

        let (stats, running) =
            tokio::try_join!(job_queue.stats(), job_queue.running_jobs_with_age())?;
        let (stuck_jobs, stuck_types) = self.config.stuck_jobs.find_stuck(&running);

        self.engine.evaluate(
            JOB_QUEUE_STUCK_JOBS,
            stuck_jobs as f64,
            self.config.budgets.stuck_jobs,
            None,
        );
        if stuck_jobs > 0 {
            tracing::warn!(stuck_jobs, types = ?stuck_types, "Stuck jobs detected");
        }

        Ok(Some(SnapshotMetrics::JobQueue(JobQueueMetrics {
            pending: stats.pending,
            processing: stats.processing,
            success_rate: stats.success_rate,
            failed_last_15m: stats.failed_last_15m,
            failed_last_24h: stats.failed_last_24h,
            oldest_pending_age_ms: stats.oldest_pending_age_ms,
            stuck_jobs,
            stuck_job_types: stuck_types.into_iter().map(String::from).collect(),
        })))
    }

    async fn probe_integrations(&self, now: i64) -> ProbeResult {
        if self.integrations.is_empty() {
            return Ok(None);
        }
        let (metrics, _) = self.check_integrations(now).await;
        Ok(Some(SnapshotMetrics::Integration(metrics)))
    }

    /// Run the checks and upsert every health record
    async fn check_integrations(&self, now: i64) -> (IntegrationMetrics, Vec<IntegrationHealthRecord>) {
        let (metrics, records) = self.integrations.run(now).await;

        for record in &records {
            if let Err(e) = self.store.upsert_integration_health(record.clone()).await {
                tracing::error!(
                    integration = %record.integration_name,
                    error = %e,
                    "Failed to persist integration health"
                );
            }
        }

        (metrics, records)
    }

    async fn probe_portal(&self, now: i64) -> ProbeResult {
        let mut metrics = self
            .portal
            .summarize(self.window_start(now), self.config.window_minutes);

        let budgets = &self.config.budgets;
        if metrics.route_samples < budgets.portal_min_samples {
            metrics.route_p95_ms = None;
        }
        if let Some(p95) = metrics.route_p95_ms {
            self.engine
                .evaluate(PORTAL_ROUTE_P95, p95, budgets.portal_route_p95_ms, None);
        }

        Ok(Some(SnapshotMetrics::Portal(metrics)))
    }

    async fn probe_storage(&self) -> ProbeResult {
        let Some(storage) = &self.storage else {
            return Ok(None);
        };

        let usage = storage.usage().await?;
        let usage_pct = if usage.quota_bytes == 0 {
            0.0
        } else {
            usage.used_bytes as f64 / usage.quota_bytes as f64 * 100.0
        };

        Ok(Some(SnapshotMetrics::Storage(StorageMetrics {
            used_bytes: usage.used_bytes,
            quota_bytes: usage.quota_bytes,
            usage_pct,
        })))
    }
}
