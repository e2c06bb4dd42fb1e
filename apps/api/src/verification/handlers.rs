use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::verification::VerificationJob;
use crate::state::AppState;

/// POST /api/v1/verification/address/:user_id
pub async fn handle_initiate_address(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<(StatusCode, Json<VerificationJob>), AppError> {
    let job = state
        .orchestrator
        .initiate_address_verification(user_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// POST /api/v1/verification/identity/:user_id
/// The body is optional; when present it must be JSON and is passed to the
/// provider untouched.
pub async fn handle_initiate_identity(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<VerificationJob>), AppError> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Identity payload must be JSON: {e}")))?
    };
    let job = state
        .orchestrator
        .initiate_identity_verification(user_id, payload)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/v1/verification/user/:user_id
pub async fn handle_list_user_jobs(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<VerificationJob>>, AppError> {
    Ok(Json(state.orchestrator.list_jobs_for_user(user_id).await?))
}

/// GET /api/v1/verification/jobs/:job_id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<VerificationJob>, AppError> {
    state
        .orchestrator
        .get_job(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Verification job {job_id} not found")))
}
