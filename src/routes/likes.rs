use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::{
    error::AppResult,
    middleware::CurrentUser,
    models::{ItemDetails, ItemId, Like},
    routes::AppState,
};

/// Optional display details sent along with a like
#[derive(Debug, Deserialize)]
pub struct LikeBody {
    pub title: String,
    pub image_ref: Option<String>,
    pub year: Option<i32>,
}

/// PUT /api/v1/likes/:item_id
///
/// 201 when the like is new, 200 when it already existed.
pub async fn like(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(item_id): Path<ItemId>,
    body: Option<Json<LikeBody>>,
) -> AppResult<(StatusCode, Json<Like>)> {
    let details = body.map(|Json(body)| ItemDetails {
        id: item_id,
        title: body.title,
        image_ref: body.image_ref,
        year: body.year,
    });

    let upserted = state.likes.like(user_id, item_id, details).await?;
    let status = if upserted.inserted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(upserted.value)))
}

/// DELETE /api/v1/likes/:item_id
pub async fn unlike(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(item_id): Path<ItemId>,
) -> AppResult<StatusCode> {
    state.likes.unlike(user_id, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/likes
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<Vec<Like>>> {
    Ok(Json(state.likes.list(user_id).await?))
}
