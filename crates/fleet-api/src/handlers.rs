//! REST API handlers.
//!
//! Admin operations go through the `Provisioner`, so manual and automatic
//! changes share the same lease, retry and audit path.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fleet_core::{ResourceLimits, Tier, Utilization, epoch_secs};
use fleet_pass::PassSummary;
use fleet_provision::{ProvisionRequest, ResizeRequest};
use fleet_state::{Actor, Deployment, DeploymentStatus, HealthStatus};

use crate::ApiState;
use crate::error::{ApiError, ApiResponse};

type ApiResult<T> = Result<T, ApiError>;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 1000;

fn load(state: &ApiState, id: &str) -> ApiResult<Deployment> {
    state
        .store
        .get_deployment(id)?
        .ok_or_else(|| ApiError::not_found(format!("deployment not found: {id}")))
}

// ── Liveness ───────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Pass ───────────────────────────────────────────────────────

/// POST /api/v1/pass
///
/// The body is the bare summary, not wrapped, so schedulers can read the
/// counters directly.
pub async fn run_pass(State(state): State<ApiState>) -> ApiResult<Json<PassSummary>> {
    let summary = state.driver.run_pass().await?;
    Ok(Json(summary))
}

// ── Deployments ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// GET /api/v1/deployments
pub async fn list_deployments(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let deployments = match query.status.as_deref() {
        Some(s) => {
            let status = s.parse::<DeploymentStatus>().map_err(ApiError::bad_request)?;
            state.store.list_deployments_by_status(status)?
        }
        None => state.store.list_deployments()?,
    };
    Ok(ApiResponse::ok(deployments))
}

/// POST /api/v1/deployments
///
/// Replays of the same order return the existing deployment with 200.
pub async fn provision(
    State(state): State<ApiState>,
    Json(request): Json<ProvisionRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.order_ref.trim().is_empty() {
        return Err(ApiError::bad_request("order_ref must not be empty"));
    }
    let existed = state.store.find_by_order_ref(&request.order_ref)?.is_some();
    let deployment = state.provisioner.provision(request).await?;
    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, ApiResponse::ok(deployment)))
}

/// GET /api/v1/deployments/{id}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(load(&state, &id)?))
}

/// POST /api/v1/deployments/{id}/suspend
pub async fn suspend(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deployment = state.provisioner.suspend(&id, Actor::Admin).await?;
    Ok(ApiResponse::ok(deployment))
}

/// POST /api/v1/deployments/{id}/unsuspend
pub async fn unsuspend(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deployment = state.provisioner.unsuspend(&id, Actor::Admin).await?;
    Ok(ApiResponse::ok(deployment))
}

/// POST /api/v1/deployments/{id}/terminate
pub async fn terminate(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deployment = state.provisioner.terminate(&id, Actor::Admin).await?;
    Ok(ApiResponse::ok(deployment))
}

/// Manual resize body.
#[derive(Debug, Deserialize)]
pub struct UpdateResourcesBody {
    pub tier: Tier,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /api/v1/deployments/{id}/resources
pub async fn update_resources(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateResourcesBody>,
) -> ApiResult<impl IntoResponse> {
    let request = ResizeRequest {
        new_tier: body.tier,
        actor: Actor::Admin,
        reason: body.reason.unwrap_or_else(|| "manual resize".to_string()),
        expected_tier: None,
    };
    let result = state.provisioner.update_resources(&id, request).await?;
    info!(deployment = %id, tier = %result.deployment.tier, outcome = ?result.outcome, "manual resize");
    Ok(ApiResponse::ok(result))
}

/// POST /api/v1/deployments/{id}/release-hold
pub async fn release_hold(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deployment = state.provisioner.release_hold(&id)?;
    Ok(ApiResponse::ok(deployment))
}

// ── Customer status ────────────────────────────────────────────

/// Where the utilization figures in a [`StatusView`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    Live,
    LastSample,
}

/// What a customer sees about their bot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub deployment_id: String,
    pub status: DeploymentStatus,
    pub health: HealthStatus,
    pub tier: Tier,
    pub limits: ResourceLimits,
    pub utilization: Option<Utilization>,
    pub usage_source: Option<UsageSource>,
    /// Unix seconds of the figures above.
    pub observed_at: Option<u64>,
    pub upgrade_recommended: bool,
}

/// GET /api/v1/deployments/{id}/status
///
/// Reads live usage when the bot has a server; falls back to the newest
/// stored sample if the platform is unreachable. Never writes.
pub async fn deployment_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deployment = load(&state, &id)?;
    let now = epoch_secs();

    let mut reading: Option<(Utilization, UsageSource, u64)> = None;
    if deployment.server_id.is_some() && !deployment.status.is_terminal() {
        match state.monitor.observe(&deployment, now).await {
            Ok(obs) => reading = Some((obs.sample.utilization, UsageSource::Live, now)),
            Err(e) => warn!(deployment = %id, error = %e, "live usage unavailable, using last sample"),
        }
    }
    if reading.is_none()
        && let Some(sample) = state.store.list_recent_samples(&id, 1)?.into_iter().next()
    {
        reading = Some((sample.utilization, UsageSource::LastSample, sample.sampled_at));
    }

    let upgrade_recommended = reading
        .as_ref()
        .is_some_and(|(u, _, _)| u.upgrade_recommended(state.upgrade_threshold));

    Ok(ApiResponse::ok(StatusView {
        deployment_id: deployment.id,
        status: deployment.status,
        health: deployment.health,
        tier: deployment.tier,
        limits: deployment.limits,
        utilization: reading.map(|(u, _, _)| u),
        usage_source: reading.map(|(_, s, _)| s),
        observed_at: reading.map(|(_, _, at)| at),
        upgrade_recommended,
    }))
}

// ── History ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT)
    }
}

/// GET /api/v1/deployments/{id}/samples
pub async fn list_samples(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    load(&state, &id)?;
    Ok(ApiResponse::ok(state.store.list_recent_samples(&id, query.limit())?))
}

/// GET /api/v1/deployments/{id}/events
pub async fn list_events(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    load(&state, &id)?;
    Ok(ApiResponse::ok(state.store.list_scaling_events(&id, query.limit())?))
}

/// GET /api/v1/deployments/{id}/actions
pub async fn list_actions(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    load(&state, &id)?;
    Ok(ApiResponse::ok(state.store.list_actions(&id, query.limit())?))
}
