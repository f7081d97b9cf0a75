//! Job submission, status and cancellation handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;
use validator::Validate;
use vscrub_models::{JobId, JobStatusView};
use vscrub_worker::{CancelAck, SubmitRequest};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Response to a submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Submit a new job. Returns 202 once the job is recorded and queued.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let owner_id = request.owner_id.clone();
    let job_id = state.jobs.submit(request).await?;
    info!(job_id = %job_id, owner_id = %owner_id, "Accepted job submission");

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

/// Current stage, status and progress of a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let view = state.jobs.get_status(&JobId::from_string(job_id)).await?;
    Ok(Json(view))
}

/// Cancel a job. Cancelling a finished job is acknowledged without change.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelAck>> {
    let ack = state.jobs.cancel(&JobId::from_string(job_id)).await?;
    Ok(Json(ack))
}
