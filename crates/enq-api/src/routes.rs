use std::str::FromStr;
use std::time::Duration;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use enq_core::{BackoffPolicy, Broker, EnqueueRequest, JobId, Ledger};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::require_tenant;
use crate::dto::{
    CompleteReq, EnqueueReq, EnqueueResp, ExtendReq, FailReq, HealthResp, JobViewDto, JobsResp,
    LeaseReq, LeaseResp, LeasedJobDto,
};
use crate::error::ApiError;
use crate::state::{AppState, TenantId};

/// Most-recent jobs returned by `GET /v1/jobs` (spec §6).
const JOB_LIST_LIMIT: i64 = 50;

/// The maximum a caller may ask `lease` to long-poll for; the route table
/// doesn't name a ceiling, but an unbounded wait would tie up a connection
/// past any sane proxy timeout.
const MAX_LEASE_WAIT: Duration = Duration::from_secs(30);

pub fn build_router<L, B>(state: AppState<L, B>) -> Router
where
    L: Ledger + 'static,
    B: Broker + 'static,
{
    let authenticated = Router::new()
        .route("/v1/jobs", post(enqueue::<L, B>).get(list_jobs::<L, B>))
        .route("/v1/jobs/:id", get(get_job::<L, B>))
        .route("/v1/lease", post(lease::<L, B>))
        .route("/v1/lease/:id/extend", post(extend_lease::<L, B>))
        .route("/v1/complete", post(complete::<L, B>))
        .route("/v1/fail", post(fail::<L, B>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_tenant::<L, B>,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(authenticated)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<HealthResp> {
    Json(HealthResp { ok: true })
}

async fn enqueue<L: Ledger, B: Broker>(
    State(state): State<AppState<L, B>>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Json(req): Json<EnqueueReq>,
) -> Result<(StatusCode, Json<EnqueueResp>), ApiError> {
    if req.job_type.trim().is_empty() {
        return Err(ApiError::bad_request("`type` must not be empty"));
    }

    let payload_len = serde_json::to_vec(&req.payload)
        .map(|v| v.len())
        .unwrap_or(usize::MAX);
    if payload_len > enq_core::DEFAULT_MAX_PAYLOAD_BYTES {
        return Err(ApiError::bad_request(format!(
            "payload exceeds {} byte limit",
            enq_core::DEFAULT_MAX_PAYLOAD_BYTES
        )));
    }

    let backoff_policy = match req.backoff_policy.as_deref() {
        None => BackoffPolicy::default(),
        Some(raw) => BackoffPolicy::from_str(raw)
            .map_err(|_| ApiError::bad_request("unknown backoffPolicy"))?,
    };

    let mut enqueue_req = EnqueueRequest::new(
        tenant_id,
        req.job_type,
        req.payload,
        state.default_visibility_timeout_sec,
    );
    if let Some(run_at) = req.run_at {
        enqueue_req.run_at = run_at;
    }
    if let Some(priority) = req.priority {
        enqueue_req.priority = priority;
    }
    enqueue_req.dedupe_key = req.dedupe_key;
    enqueue_req.dedupe_ttl_sec = req.dedupe_ttl_sec;
    if let Some(max_attempts) = req.max_attempts {
        enqueue_req.max_attempts = max_attempts;
    }
    enqueue_req.backoff_policy = backoff_policy;
    if let Some(visibility_timeout_sec) = req.visibility_timeout_sec {
        enqueue_req.visibility_timeout_sec = visibility_timeout_sec;
    }

    let id = state.coordinator.enqueue(enqueue_req).await?;
    Ok((
        StatusCode::CREATED,
        Json(EnqueueResp { id, status: "queued" }),
    ))
}

async fn list_jobs<L: Ledger, B: Broker>(
    State(state): State<AppState<L, B>>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
) -> Result<Json<JobsResp>, ApiError> {
    let jobs = state.coordinator.list_jobs(&tenant_id, JOB_LIST_LIMIT).await?;
    Ok(Json(JobsResp {
        jobs: jobs.into_iter().map(JobViewDto::from).collect(),
    }))
}

async fn get_job<L: Ledger, B: Broker>(
    State(state): State<AppState<L, B>>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobViewDto>, ApiError> {
    let view = state.coordinator.get_job(&tenant_id, id).await?;
    Ok(Json(view.into()))
}

async fn lease<L: Ledger, B: Broker>(
    State(state): State<AppState<L, B>>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Json(req): Json<LeaseReq>,
) -> Result<Json<LeaseResp>, ApiError> {
    let max_wait = req
        .max_wait_ms
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO)
        .min(MAX_LEASE_WAIT);

    let leased = state
        .coordinator
        .lease(&tenant_id, &req.worker_id, req.visibility_timeout_sec, max_wait)
        .await?;

    Ok(Json(LeaseResp {
        job: leased.map(LeasedJobDto::from),
    }))
}

async fn extend_lease<L: Ledger, B: Broker>(
    State(state): State<AppState<L, B>>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Path(id): Path<JobId>,
    Json(req): Json<ExtendReq>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .extend_lease(&tenant_id, &req.worker_id, id, req.extend_by_sec)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn complete<L: Ledger, B: Broker>(
    State(state): State<AppState<L, B>>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Json(req): Json<CompleteReq>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .complete(&tenant_id, &req.worker_id, req.job_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn fail<L: Ledger, B: Broker>(
    State(state): State<AppState<L, B>>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Json(req): Json<FailReq>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .fail(&tenant_id, &req.worker_id, req.job_id, req.error, req.retryable)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
