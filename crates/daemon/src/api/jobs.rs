use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use engine::{Job, JobState};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use super::ApiError;
use crate::error::CoordinatorError;
use crate::jobs::{JobCoordinator, JobSubmission, RejectReason, SubmitOutcome};

#[derive(Serialize)]
pub struct SubmitResponse {
    job_id: String,
}

#[derive(Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    job: Job,
    resolved_count: usize,
    total_count: usize,
}

#[derive(Serialize)]
pub struct CancelResponse {
    cancelled: bool,
}

pub fn router(coordinator: Arc<JobCoordinator>) -> Router {
    Router::new()
        .route("/", post(submit_job))
        .route("/:id", get(get_job))
        .route("/:id/cancel", post(cancel_job))
        .route("/:id/artifact", get(get_artifact))
        .with_state(coordinator)
}

async fn submit_job(
    State(coordinator): State<Arc<JobCoordinator>>,
    Json(submission): Json<JobSubmission>,
) -> Result<Response, ApiError> {
    match coordinator.submit_job(submission).map_err(ApiError::internal)? {
        SubmitOutcome::Accepted(job_id) => Ok((
            StatusCode::ACCEPTED,
            Json(SubmitResponse {
                job_id: job_id.to_string(),
            }),
        )
            .into_response()),
        SubmitOutcome::Rejected(reason) => {
            let status = match reason {
                RejectReason::Invalid(_) => StatusCode::BAD_REQUEST,
                RejectReason::AlreadyActive | RejectReason::AlreadyExists => StatusCode::CONFLICT,
            };
            Err(ApiError::new(status, reason.to_string()))
        }
    }
}

fn find_job(coordinator: &JobCoordinator, id: &str) -> Result<Job, ApiError> {
    coordinator
        .get_job_status(id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("job {} not found", id)))
}

async fn get_job(
    State(coordinator): State<Arc<JobCoordinator>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = find_job(&coordinator, &id)?;
    Ok(Json(JobResponse {
        resolved_count: job.resolved_count(),
        total_count: job.total_count(),
        job,
    }))
}

async fn cancel_job(
    State(coordinator): State<Arc<JobCoordinator>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = coordinator.cancel_job(&id).map_err(|e| match e {
        CoordinatorError::InvalidJobId(reason) => ApiError::new(StatusCode::BAD_REQUEST, reason),
        other => ApiError::internal(other),
    })?;
    Ok(Json(CancelResponse { cancelled }))
}

async fn get_artifact(
    State(coordinator): State<Arc<JobCoordinator>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let job = find_job(&coordinator, &id)?;
    let artifact = match (job.state, job.output_artifact) {
        (JobState::Completed, Some(artifact)) => artifact,
        (state, _) => {
            return Err(ApiError::new(
                StatusCode::NOT_FOUND,
                format!("job {} has no artifact ({})", id, state),
            ))
        }
    };

    let response = ServeFile::new(&artifact)
        .oneshot(request)
        .await
        .map_err(ApiError::internal)?;
    Ok(response.into_response())
}
