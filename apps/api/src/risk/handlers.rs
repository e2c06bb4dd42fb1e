use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::errors::AppError;
use crate::risk::RiskAssessment;
use crate::state::AppState;

/// GET /api/v1/risk/:user_id
pub async fn handle_assess_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<RiskAssessment>, AppError> {
    Ok(Json(state.risk.assess_user(user_id).await?))
}
