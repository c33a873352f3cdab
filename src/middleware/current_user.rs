use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::{error::AppError, models::UserId};

/// Set by the upstream auth layer on every authenticated request
pub const USER_ID_HEADER: &str = "x-user-id";

/// Query parameter fallback for clients that cannot set headers (browser WebSockets)
const USER_ID_PARAM: &str = "user_id";

/// The authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub UserId);

impl CurrentUser {
    fn from_parts(parts: &Parts) -> Result<Self, AppError> {
        let raw = match parts.headers.get(USER_ID_HEADER) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| AppError::InvalidInput("x-user-id is not valid text".to_string()))?
                    .to_string(),
            ),
            None => query_user_id(parts.uri.query()),
        };

        let raw = raw.ok_or_else(|| AppError::Unauthorized("missing x-user-id header".to_string()))?;

        Uuid::parse_str(raw.trim())
            .map(CurrentUser)
            .map_err(|_| AppError::InvalidInput(format!("malformed user id: {}", raw)))
    }
}

fn query_user_id(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == USER_ID_PARAM)
        .map(|(_, value)| value.to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_parts(parts)
    }
}
