use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::{
    error::AppResult,
    middleware::CurrentUser,
    models::{ActiveMatch, ItemId, RequestOutcome, StatusView, UserId},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct MatchRequestBody {
    pub target_user_id: UserId,
    pub item_id: ItemId,
}

/// Identifies an inbound request by its sender and anchoring item
#[derive(Debug, Deserialize)]
pub struct InboundRequestBody {
    pub requestor_id: UserId,
    pub item_id: ItemId,
}

/// POST /api/v1/matches/requests
pub async fn request(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<MatchRequestBody>,
) -> AppResult<Json<RequestOutcome>> {
    let outcome = state
        .matches
        .request(user_id, body.target_user_id, body.item_id)
        .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/matches/accept
pub async fn accept(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<InboundRequestBody>,
) -> AppResult<Json<RequestOutcome>> {
    let outcome = state
        .matches
        .accept(user_id, body.requestor_id, body.item_id)
        .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/matches/decline
pub async fn decline(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<InboundRequestBody>,
) -> AppResult<StatusCode> {
    state
        .matches
        .decline(user_id, body.requestor_id, body.item_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/matches/status/:other_user_id
pub async fn status(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(other_user_id): Path<UserId>,
) -> AppResult<Json<StatusView>> {
    Ok(Json(state.matches.get_status(user_id, other_user_id).await?))
}

/// GET /api/v1/matches
pub async fn active(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<Vec<ActiveMatch>>> {
    Ok(Json(state.matches.list_active_matches(user_id).await?))
}
