use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    acknowledge_alert, alert_stats, budgets, health_check, list_alerts, list_integrations,
    overview, portal_metrics, refresh_integrations, snapshots, snooze_alert, violations, AppState,
};
use crate::alerts::{AlertEvaluator, HttpEmailNotifier, LogNotifier, Notifier};
use crate::budget::BudgetEngine;
use crate::clock::{Clock, SystemClock};
use crate::collector::{
    DirectoryUsageProbe, HttpIntegrationCheck, IntegrationCheck, MetricsCollector, RequestTiming,
};
use crate::config::MonitorConfig;
use crate::store::{MemoryStore, RetentionWorker, Store};

/// Endpoint label shared by every request that matched no route
pub const UNMATCHED_ROUTE: &str = "<unmatched>";

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Dashboard reads
        .route("/api/overview", get(overview))
        .route("/api/budgets", get(budgets))
        .route("/api/violations", get(violations))
        .route("/api/snapshots/:snapshot_type", get(snapshots))
        // Alerts
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/stats", get(alert_stats))
        .route("/api/alerts/:id/acknowledge", post(acknowledge_alert))
        .route("/api/alerts/:id/snooze", post(snooze_alert))
        // Integrations
        .route("/api/integrations", get(list_integrations))
        .route("/api/integrations/refresh", post(refresh_integrations))
        // Client-reported metrics
        .route("/api/portal/metrics", post(portal_metrics))
        // Middleware
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            record_request_timing,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Feed every served request into the collector's request log, keyed by
/// its route template so the endpoint set stays bounded by the router
pub async fn record_request_timing(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    state.collector.request_log().record(RequestTiming::new(
        method.as_str(),
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64() * 1000.0,
        state.clock.now_ms(),
    ));

    response
}

/// Wire the store, engine, collector and evaluator from configuration
pub fn build_state(config: &MonitorConfig, clock: Arc<dyn Clock>) -> Arc<AppState> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let engine = Arc::new(BudgetEngine::new(Arc::clone(&clock)));

    let checks: Vec<Arc<dyn IntegrationCheck>> = config
        .integrations
        .iter()
        .map(|integration| {
            Arc::new(HttpIntegrationCheck::new(
                integration.name.clone(),
                integration.url.clone(),
                config.collector.probe_timeout,
            )) as Arc<dyn IntegrationCheck>
        })
        .collect();

    let mut collector = MetricsCollector::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        Arc::clone(&clock),
        config.collector.clone(),
    )
    .with_integration_checks(checks);

    if let Some(dir) = &config.data_dir {
        collector = collector.with_storage_probe(Arc::new(DirectoryUsageProbe::new(
            dir.clone(),
            config.storage_quota_bytes,
        )));
    }

    let notifier: Arc<dyn Notifier> = match &config.email {
        Some(email) => Arc::new(HttpEmailNotifier::new(
            email.api_url.clone(),
            email.api_key.clone(),
            email.from.clone(),
        )),
        None => Arc::new(LogNotifier),
    };

    let evaluator = AlertEvaluator::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        Arc::clone(&clock),
        notifier,
        config.evaluator.clone(),
    );

    Arc::new(AppState {
        collector: Arc::new(collector),
        evaluator: Arc::new(evaluator),
        engine,
        store,
        clock,
    })
}

/// Run the HTTP server and the background loops until ctrl-c
pub async fn run_server(config: MonitorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = build_state(&config, Arc::clone(&clock));

    if config.email.is_none() {
        tracing::info!("Email API not configured, alert notifications will only be logged");
    }

    // Start background workers
    let retention_worker = Arc::new(RetentionWorker::new(
        Arc::clone(&state.store),
        clock,
        config.retention,
    ));
    let retention_handle = Arc::clone(&retention_worker).start();
    let collector_handle = Arc::clone(&state.collector).start();
    let evaluator_handle = Arc::clone(&state.evaluator).start();

    // Build router
    let app = build_router(Arc::clone(&state));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting budgetwatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state), retention_worker))
        .await?;

    retention_handle.abort();
    collector_handle.abort();
    evaluator_handle.abort();

    tracing::info!("budgetwatch server stopped");
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>, retention_worker: Arc<RetentionWorker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    state.collector.stop();
    state.evaluator.stop();
    retention_worker.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Breach, EvaluatorConfig};
    use crate::clock::{ManualClock, MINUTE_MS};
    use crate::collector::CollectorConfig;
    use crate::store::AlertSeverity;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn create_test_state() -> (Arc<ManualClock>, Arc<AppState>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let engine = Arc::new(BudgetEngine::new(clock.clone()));
        let collector = MetricsCollector::new(
            store.clone(),
            engine.clone(),
            clock.clone(),
            CollectorConfig::default(),
        );
        let evaluator = AlertEvaluator::new(
            store.clone(),
            engine.clone(),
            clock.clone(),
            Arc::new(LogNotifier),
            EvaluatorConfig::default(),
        );
        let state = Arc::new(AppState {
            collector: Arc::new(collector),
            evaluator: Arc::new(evaluator),
            engine,
            store,
            clock: clock.clone(),
        });
        (clock, state)
    }

    async fn open_alert(state: &AppState, metric: &str) -> u64 {
        state
            .evaluator
            .create_or_update_alert(
                Breach {
                    metric_name: metric.to_string(),
                    source: "database".to_string(),
                    severity: AlertSeverity::Critical,
                    title: format!("{} budget exceeded", metric),
                    description: String::new(),
                    actual: 95.0,
                    threshold: 90.0,
                },
                state.clock.now_ms(),
            )
            .await
            .unwrap()
            .alert()
            .id
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_, state) = create_test_state();
        let (status, body) = send(build_router(state), "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_requests_are_timed() {
        let (_, state) = create_test_state();
        let app = build_router(Arc::clone(&state));

        send(app.clone(), "GET", "/health", None).await;
        send(app, "GET", "/api/alerts/stats", None).await;

        let log = state.collector.request_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log.since(0)[1].endpoint, "GET /api/alerts/stats");
    }

    #[tokio::test]
    async fn test_request_timing_uses_route_templates() {
        let (_, state) = create_test_state();
        let app = build_router(Arc::clone(&state));

        send(
            app.clone(),
            "POST",
            "/api/alerts/7/acknowledge",
            Some(serde_json::json!({ "user_id": "u-1" })),
        )
        .await;
        for n in 0..50 {
            for _ in 0..20 {
                let (status, _) = send(app.clone(), "GET", &format!("/wp-admin/scan-{}.php", n), None).await;
                assert_eq!(status, StatusCode::NOT_FOUND);
            }
        }

        let stats = state.collector.request_log().endpoint_stats(0);
        let endpoints: Vec<&str> = stats.iter().map(|s| s.endpoint.as_str()).collect();
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.contains(&"POST /api/alerts/:id/acknowledge"));
        let unmatched = format!("GET {}", UNMATCHED_ROUTE);
        let bucket = stats.iter().find(|s| s.endpoint == unmatched).unwrap();
        assert_eq!(bucket.count, 1_000);

        state.collector.collect_once().await.unwrap();
        assert_eq!(state.engine.summary().tracked_metrics, 1);
    }

    #[tokio::test]
    async fn test_overview_and_budgets() {
        let (_, state) = create_test_state();
        open_alert(&state, "DB Pool Saturation").await;
        let app = build_router(Arc::clone(&state));

        let (status, body) = send(app.clone(), "GET", "/api/overview", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "critical");
        assert_eq!(body["alerts"]["critical_count"], 1);

        let (status, body) = send(app, "GET", "/api/budgets", None).await;
        assert_eq!(status, StatusCode::OK);
        let budgets = body["budgets"].as_array().unwrap();
        assert_eq!(budgets.len(), state.evaluator.catalog().len());
        assert_eq!(budgets[0]["status"], "no_data");
    }

    #[tokio::test]
    async fn test_alert_list_filter() {
        let (_, state) = create_test_state();
        open_alert(&state, "Disk Usage").await;
        let app = build_router(state);

        let (status, body) = send(app.clone(), "GET", "/api/alerts?status=active", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alerts"].as_array().unwrap().len(), 1);

        let (status, body) = send(app.clone(), "GET", "/api/alerts?status=resolved", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["alerts"].as_array().unwrap().is_empty());

        let (status, body) = send(app, "GET", "/api/alerts?status=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("bogus"));
    }

    #[tokio::test]
    async fn test_acknowledge_and_snooze() {
        let (clock, state) = create_test_state();
        let id = open_alert(&state, "Stuck Jobs").await;
        let app = build_router(Arc::clone(&state));

        let (status, body) = send(
            app.clone(),
            "POST",
            &format!("/api/alerts/{}/snooze", id),
            Some(serde_json::json!({ "minutes": 15, "user_id": "u-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "snoozed");
        assert_eq!(body["snooze_until"], clock.now_ms() + 15 * MINUTE_MS);

        let (status, _) = send(
            app.clone(),
            "POST",
            &format!("/api/alerts/{}/snooze", id),
            Some(serde_json::json!({ "minutes": 20_000, "user_id": "u-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            app.clone(),
            "POST",
            &format!("/api/alerts/{}/acknowledge", id),
            Some(serde_json::json!({ "user_id": "u-2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "acknowledged");
        assert_eq!(body["acknowledged_by"], "u-2");

        let (status, _) = send(
            app.clone(),
            "POST",
            &format!("/api/alerts/{}/acknowledge", id),
            Some(serde_json::json!({ "user_id": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            app.clone(),
            "POST",
            "/api/alerts/4242/acknowledge",
            Some(serde_json::json!({ "user_id": "u-2" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state
            .evaluator
            .auto_resolve_alerts(clock.now_ms() + 5 * MINUTE_MS)
            .await
            .unwrap();
        let (status, _) = send(
            app,
            "POST",
            &format!("/api/alerts/{}/acknowledge", id),
            Some(serde_json::json!({ "user_id": "u-2" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_snapshots_endpoint() {
        let (_, state) = create_test_state();
        state.collector.collect_once().await.unwrap();
        let app = build_router(state);

        let (status, body) = send(app.clone(), "GET", "/api/snapshots/portal?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["snapshot_type"], "portal");
        assert_eq!(body["snapshots"].as_array().unwrap().len(), 1);

        let (status, _) = send(app, "GET", "/api/snapshots/nonexistent", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_portal_metrics_ingest() {
        let (clock, state) = create_test_state();
        let app = build_router(Arc::clone(&state));

        let (status, body) = send(
            app,
            "POST",
            "/api/portal/metrics",
            Some(serde_json::json!({
                "route_transitions": [
                    { "route": "/dashboard", "duration_ms": 320.0 },
                    { "route": "/reports", "duration_ms": 2100.0 }
                ],
                "js_errors": [{ "message": "TypeError: x is undefined" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], 3);

        let metrics = state
            .collector
            .portal_buffer()
            .summarize(clock.now_ms() - MINUTE_MS, 15);
        assert_eq!(metrics.route_samples, 2);
        assert_eq!(metrics.js_error_count, 1);
    }

    #[tokio::test]
    async fn test_violations_and_integrations() {
        let (_, state) = create_test_state();
        let app = build_router(state);

        let (status, body) = send(app.clone(), "GET", "/api/violations", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["active_violations"], 0);

        let (status, _) = send(app.clone(), "GET", "/api/violations?window_minutes=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(app.clone(), "POST", "/api/integrations/refresh", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["integrations"].as_array().unwrap().is_empty());

        let (status, _) = send(app, "GET", "/api/integrations", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_build_state_from_config() {
        let config = MonitorConfig {
            integrations: vec![crate::config::IntegrationConfig {
                name: "payments".to_string(),
                url: None,
            }],
            ..MonitorConfig::default()
        };
        let state = build_state(&config, Arc::new(ManualClock::new(0)));
        assert_eq!(state.evaluator.catalog().len(), 10);
        assert!(!state.collector.is_running());
    }
}
