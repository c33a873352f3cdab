use axum::{
    extract::{Path, State},
    http::StatusCode,
};

use crate::{error::AppResult, middleware::CurrentUser, models::RoomId, routes::AppState};

/// POST /api/v1/rooms/:room_id/leave
pub async fn leave(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<RoomId>,
) -> AppResult<StatusCode> {
    state.matches.leave_room(user_id, room_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/rooms/:room_id/rejoin
pub async fn rejoin(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<RoomId>,
) -> AppResult<StatusCode> {
    state.matches.rejoin_room(user_id, room_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
