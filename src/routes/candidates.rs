use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{error::AppResult, middleware::CurrentUser, models::Candidate, routes::AppState};

#[derive(Debug, Deserialize)]
pub struct CandidatesQuery {
    limit: Option<i64>,
}

/// GET /api/v1/candidates?limit=N
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(params): Query<CandidatesQuery>,
) -> AppResult<Json<Vec<Candidate>>> {
    let candidates = state.candidates.get_candidates(user_id, params.limit).await?;
    Ok(Json(candidates))
}
