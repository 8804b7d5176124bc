use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::ExecutionEngine;
use crate::error::QueueError;
use crate::scheduler::{InstanceId, Job, JobId, NewJob};

#[derive(Clone)]
pub struct DashboardState {
    pub engine: Arc<ExecutionEngine>,
}

#[derive(Serialize)]
struct JobResponse {
    id: JobId,
    instance_id: InstanceId,
    owner: String,
    status: String,
    db_name: String,
    threads: u32,
    duration_secs: u64,
    created_at_ms: i64,
    finished_at_ms: Option<i64>,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            instance_id: job.instance_id,
            owner: job.owner.clone(),
            status: job.status.to_string(),
            db_name: job.params.db_name.clone(),
            threads: job.params.threads,
            duration_secs: job.params.duration_secs,
            created_at_ms: job.created_at.timestamp_millis(),
            finished_at_ms: job.finished_at.map(|t| t.timestamp_millis()),
        }
    }
}

#[derive(Deserialize)]
pub struct ActionRequest {
    pub actor: String,
    #[serde(default)]
    pub remark: String,
}

#[derive(Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub user: String,
}

#[derive(Serialize)]
struct LocksResponse {
    instance_id: InstanceId,
    /// Claims in queue order; the first one runs or runs next.
    claims: Vec<JobId>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Error wrapper mapping engine errors onto HTTP status codes.
pub struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            QueueError::JobNotFound(_) | QueueError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
            QueueError::Unauthorized(_) => StatusCode::FORBIDDEN,
            QueueError::DuplicateClaim(_) | QueueError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            QueueError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/jobs", get(list_jobs_handler).post(submit_job_handler))
        .route("/api/jobs/{id}", get(job_status_handler))
        .route("/api/jobs/{id}/result", get(job_result_handler))
        .route("/api/jobs/{id}/audit", get(job_audit_handler))
        .route("/api/jobs/{id}/approve", post(approve_handler))
        .route("/api/jobs/{id}/reject", post(reject_handler))
        .route("/api/jobs/{id}/execute", post(execute_handler))
        .route("/api/jobs/{id}/cancel", post(cancel_handler))
        .route("/api/locks/{instance}", get(locks_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn list_jobs_handler(State(state): State<DashboardState>) -> ApiResult<Vec<JobResponse>> {
    let jobs = state.engine.jobs().list().await?;
    Ok(Json(jobs.iter().map(JobResponse::from).collect()))
}

async fn submit_job_handler(
    State(state): State<DashboardState>,
    Json(submission): Json<NewJob>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let job = state.engine.submit(submission).await?;
    Ok((StatusCode::CREATED, Json(JobResponse::from(&job))))
}

async fn job_status_handler(
    State(state): State<DashboardState>,
    Path(id): Path<u64>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<crate::engine::JobStatusView> {
    Ok(Json(state.engine.status(JobId(id), &query.user).await?))
}

async fn job_result_handler(
    State(state): State<DashboardState>,
    Path(id): Path<u64>,
) -> ApiResult<Option<crate::worker::BenchMetrics>> {
    Ok(Json(state.engine.result(JobId(id)).await?))
}

async fn job_audit_handler(
    State(state): State<DashboardState>,
    Path(id): Path<u64>,
) -> ApiResult<Vec<crate::scheduler::AuditLogEntry>> {
    Ok(Json(state.engine.audit_log(JobId(id)).await?))
}

async fn approve_handler(
    State(state): State<DashboardState>,
    Path(id): Path<u64>,
    Json(body): Json<ActionRequest>,
) -> ApiResult<JobResponse> {
    let job = state
        .engine
        .approve(JobId(id), &body.actor, &body.remark)
        .await?;
    Ok(Json(JobResponse::from(&job)))
}

async fn reject_handler(
    State(state): State<DashboardState>,
    Path(id): Path<u64>,
    Json(body): Json<ActionRequest>,
) -> ApiResult<JobResponse> {
    let job = state
        .engine
        .reject(JobId(id), &body.actor, &body.remark)
        .await?;
    Ok(Json(JobResponse::from(&job)))
}

/// Queue the job and run it in the background. Responds once the job is
/// `queued`; progress is visible through the status endpoint.
async fn execute_handler(
    State(state): State<DashboardState>,
    Path(id): Path<u64>,
    Json(body): Json<ActionRequest>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let job_id = JobId(id);
    state.engine.enqueue_and_spawn(job_id, &body.actor).await?;
    let job = state.engine.jobs().get(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(&job))))
}

async fn cancel_handler(
    State(state): State<DashboardState>,
    Path(id): Path<u64>,
    Json(body): Json<ActionRequest>,
) -> ApiResult<crate::engine::CancelOutcome> {
    Ok(Json(
        state
            .engine
            .cancel(JobId(id), &body.actor, &body.remark)
            .await?,
    ))
}

async fn locks_handler(
    State(state): State<DashboardState>,
    Path(instance): Path<u64>,
) -> ApiResult<LocksResponse> {
    let instance_id = InstanceId(instance);
    let claims = state.engine.leases().claims_for(instance_id).await?;
    Ok(Json(LocksResponse {
        instance_id,
        claims,
    }))
}
