use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerts::{AlertActionError, AlertEvaluator, AlertStats, BudgetStatus};
use crate::budget::{ActiveViolation, BudgetEngine, BudgetSummary, ViolationRecord};
use crate::clock::{Clock, MINUTE_MS};
use crate::collector::{JsError, MetricsCollector, RouteTransition};
use crate::overview::{build_overview, SystemOverview};
use crate::snapshot::{MetricSnapshot, SnapshotType};
use crate::store::{Alert, AlertStatus, IntegrationHealthRecord, Store, StoreError};

const DEFAULT_SNAPSHOT_LIMIT: usize = 60;
const MAX_SNAPSHOT_LIMIT: usize = 1_000;

/// Application state shared across handlers
pub struct AppState {
    pub collector: Arc<MetricsCollector>,
    pub evaluator: Arc<AlertEvaluator>,
    pub engine: Arc<BudgetEngine>,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Overview and Budgets
// ============================================================================

pub async fn overview(State(state): State<Arc<AppState>>) -> Result<Json<SystemOverview>, ApiError> {
    let overview = build_overview(&state.collector, &state.evaluator, &state.engine).await?;
    Ok(Json(overview))
}

#[derive(Serialize)]
pub struct BudgetsResponse {
    pub budgets: Vec<BudgetStatus>,
}

pub async fn budgets(State(state): State<Arc<AppState>>) -> Result<Json<BudgetsResponse>, ApiError> {
    let budgets = state.evaluator.budget_statuses().await?;
    Ok(Json(BudgetsResponse { budgets }))
}

#[derive(Deserialize)]
pub struct ViolationsQuery {
    /// History window, default one hour
    #[serde(default)]
    pub window_minutes: Option<i64>,
}

#[derive(Serialize)]
pub struct ViolationsResponse {
    pub active: Vec<ActiveViolation>,
    pub history: Vec<ViolationRecord>,
    pub summary: BudgetSummary,
}

pub async fn violations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ViolationsQuery>,
) -> Result<Json<ViolationsResponse>, ApiError> {
    let window_minutes = query.window_minutes.unwrap_or(60);
    if window_minutes <= 0 {
        return Err(ApiError::BadRequest(
            "window_minutes must be positive".to_string(),
        ));
    }

    Ok(Json(ViolationsResponse {
        active: state.engine.current_violations(),
        history: state.engine.violation_history(window_minutes * MINUTE_MS),
        summary: state.engine.summary(),
    }))
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<AlertsResponse>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<AlertStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let alerts = state.evaluator.list_alerts(status).await?;
    Ok(Json(AlertsResponse { alerts }))
}

pub async fn alert_stats(State(state): State<Arc<AppState>>) -> Result<Json<AlertStats>, ApiError> {
    Ok(Json(state.evaluator.alert_stats().await?))
}

#[derive(Deserialize)]
pub struct AcknowledgeRequest {
    pub user_id: String,
}

pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<Json<Alert>, ApiError> {
    let user_id = required_user(&request.user_id)?;
    let alert = state.evaluator.acknowledge_alert(id, user_id).await?;
    Ok(Json(alert))
}

#[derive(Deserialize)]
pub struct SnoozeRequest {
    pub minutes: i64,
    pub user_id: String,
}

pub async fn snooze_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(request): Json<SnoozeRequest>,
) -> Result<Json<Alert>, ApiError> {
    let user_id = required_user(&request.user_id)?;
    let alert = state
        .evaluator
        .snooze_alert(id, request.minutes, user_id)
        .await?;
    Ok(Json(alert))
}

fn required_user(user_id: &str) -> Result<&str, ApiError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    Ok(user_id)
}

// ============================================================================
// Integrations
// ============================================================================

#[derive(Serialize)]
pub struct IntegrationsResponse {
    pub integrations: Vec<IntegrationHealthRecord>,
}

pub async fn list_integrations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<IntegrationsResponse>, ApiError> {
    let integrations = state.store.select_integration_health().await?;
    Ok(Json(IntegrationsResponse { integrations }))
}

pub async fn refresh_integrations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<IntegrationsResponse>, ApiError> {
    let integrations = state
        .collector
        .refresh_integration_health()
        .await
        .ok_or_else(|| ApiError::Conflict("Integration refresh already running".to_string()))?;
    Ok(Json(IntegrationsResponse { integrations }))
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Deserialize)]
pub struct SnapshotsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct SnapshotsResponse {
    pub snapshot_type: SnapshotType,
    pub snapshots: Vec<MetricSnapshot>,
}

pub async fn snapshots(
    State(state): State<Arc<AppState>>,
    Path(snapshot_type): Path<String>,
    Query(query): Query<SnapshotsQuery>,
) -> Result<Json<SnapshotsResponse>, ApiError> {
    let snapshot_type: SnapshotType = snapshot_type.parse().map_err(ApiError::NotFound)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SNAPSHOT_LIMIT)
        .min(MAX_SNAPSHOT_LIMIT);

    let snapshots = state.collector.snapshot_history(snapshot_type, limit).await?;
    Ok(Json(SnapshotsResponse {
        snapshot_type,
        snapshots,
    }))
}

// ============================================================================
// Portal Metrics
// ============================================================================

#[derive(Deserialize)]
pub struct PortalMetricsRequest {
    #[serde(default)]
    pub route_transitions: Vec<RouteTransition>,
    #[serde(default)]
    pub js_errors: Vec<JsError>,
}

#[derive(Serialize)]
pub struct PortalMetricsResponse {
    pub accepted: usize,
}

pub async fn portal_metrics(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PortalMetricsRequest>,
) -> Json<PortalMetricsResponse> {
    let now = state.clock.now_ms();
    let buffer = state.collector.portal_buffer();
    let accepted = request.route_transitions.len() + request.js_errors.len();

    // A missing timestamp means now
    for mut transition in request.route_transitions {
        if transition.at <= 0 {
            transition.at = now;
        }
        buffer.record_route_transition(transition);
    }
    for mut error in request.js_errors {
        if error.at <= 0 {
            error.at = now;
        }
        buffer.record_js_error(error);
    }

    Json(PortalMetricsResponse { accepted })
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlertNotFound(_) => ApiError::NotFound(e.to_string()),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Unavailable(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AlertActionError> for ApiError {
    fn from(e: AlertActionError) -> Self {
        match e {
            AlertActionError::NotFound(_) => ApiError::NotFound(e.to_string()),
            AlertActionError::InvalidTransition { .. } => ApiError::Conflict(e.to_string()),
            AlertActionError::InvalidSnooze(_) => ApiError::BadRequest(e.to_string()),
            AlertActionError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
