use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::JobId;
use crate::models::scan::JobStatusResponse;
use crate::routes::ApiError;
use crate::services::queue::QueueError;

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        let status = match err {
            QueueError::NotFound(_) | QueueError::NothingToUndo { .. } => StatusCode::NOT_FOUND,
            QueueError::NotCancellable { .. }
            | QueueError::InvalidTransition { .. }
            | QueueError::AlreadyUndone(_) => StatusCode::CONFLICT,
            QueueError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        ApiError::new(status, err.to_string())
    }
}

/// GET /api/v1/jobs: all tracked jobs, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobStatusResponse>> {
    Json(state.queue.jobs().iter().map(JobStatusResponse::from).collect())
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let id = JobId(job_id);
    let job = state.queue.status(id).ok_or(QueueError::NotFound(id))?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// DELETE /api/v1/jobs/{job_id}: cancel a job that has not started.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.queue.cancel(JobId(job_id))?;
    Ok(Json(JobStatusResponse::from(&job)))
}
