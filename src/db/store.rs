use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::{
    error::AppResult,
    models::{ItemDetails, ItemId, Like, MatchRequest, RoomId, UserId},
};

/// Another user's overlap with a given like-set, aggregated in the store
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OverlapRow {
    pub user_id: UserId,
    pub overlap_count: i64,
    pub shared_item_ids: Vec<ItemId>,
    /// Most recent time the other user liked one of the shared items
    pub latest_liked_at: DateTime<Utc>,
}

/// A room in which both the user and `other_user_id` are active members
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PairRoom {
    pub other_user_id: UserId,
    pub room_id: RoomId,
    pub matched_at: DateTime<Utc>,
}

/// Raw active-match row, before shared items are attached
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ActiveMatchRow {
    pub other_user_id: UserId,
    pub display_name: Option<String>,
    pub room_id: RoomId,
    pub matched_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
}

/// What the room transaction did for a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomOutcome {
    /// A new room and two active memberships were written
    Created,
    /// The pair already had a room with an inactive membership; both were reactivated
    Reactivated,
    /// The pair already had an active room; nothing was written
    Existing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomCreation {
    pub room_id: RoomId,
    pub matched_at: DateTime<Utc>,
    pub outcome: RoomOutcome,
}

impl RoomCreation {
    /// Whether this call changed the pair's state (and so owns the notification)
    pub fn wrote(&self) -> bool {
        self.outcome != RoomOutcome::Existing
    }
}

/// Relational store of record for likes, match requests, rooms and memberships
///
/// Every method is one round-trip. Inserts that hit a uniqueness constraint must
/// fail with `AppError::Conflict` so callers can converge instead of erroring.
#[async_trait]
pub trait MatchStore: Send + Sync {
    // Likes and items

    async fn find_like(&self, user_id: UserId, item_id: ItemId) -> AppResult<Option<Like>>;

    async fn insert_like(&self, user_id: UserId, item_id: ItemId) -> AppResult<Like>;

    async fn delete_like(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool>;

    /// All likes for a user, newest first
    async fn list_likes(&self, user_id: UserId) -> AppResult<Vec<Like>>;

    async fn upsert_item(&self, item: &ItemDetails) -> AppResult<()>;

    async fn item_details(&self, item_ids: &[ItemId]) -> AppResult<Vec<ItemDetails>>;

    async fn display_names(&self, user_ids: &[UserId]) -> AppResult<HashMap<UserId, String>>;

    // Ranking

    /// Users other than `user_id` who like any of `item_ids`, grouped per user
    async fn overlapping_users(
        &self,
        user_id: UserId,
        item_ids: &[ItemId],
    ) -> AppResult<Vec<OverlapRow>>;

    /// `(other_user_id, item_id)` for every item liked by both `user_id` and one of `others`
    async fn shared_likes(
        &self,
        user_id: UserId,
        others: &[UserId],
    ) -> AppResult<Vec<(UserId, ItemId)>>;

    // Match requests

    async fn find_request(
        &self,
        requestor_id: UserId,
        target_user_id: UserId,
        item_id: ItemId,
    ) -> AppResult<Option<MatchRequest>>;

    async fn insert_request(
        &self,
        requestor_id: UserId,
        target_user_id: UserId,
        item_id: ItemId,
    ) -> AppResult<MatchRequest>;

    async fn delete_request(
        &self,
        requestor_id: UserId,
        target_user_id: UserId,
        item_id: ItemId,
    ) -> AppResult<bool>;

    /// Requests from `requestor_id` to any of `targets`, for any item
    async fn requests_sent(
        &self,
        requestor_id: UserId,
        targets: &[UserId],
    ) -> AppResult<Vec<MatchRequest>>;

    /// Requests to `target_user_id` from any of `requestors`, for any item
    async fn requests_received(
        &self,
        target_user_id: UserId,
        requestors: &[UserId],
    ) -> AppResult<Vec<MatchRequest>>;

    // Rooms and memberships

    /// Rooms where `user_id` and one of `others` are both active members
    async fn active_rooms_with(
        &self,
        user_id: UserId,
        others: &[UserId],
    ) -> AppResult<Vec<PairRoom>>;

    /// Atomically converge the pair onto exactly one room with two active memberships
    /// and no outstanding match requests between them
    async fn create_room_for_pair(&self, user_a: UserId, user_b: UserId) -> AppResult<RoomCreation>;

    /// Returns false when the user has no membership in the room
    async fn set_membership_active(
        &self,
        room_id: RoomId,
        user_id: UserId,
        active: bool,
    ) -> AppResult<bool>;

    async fn active_matches(&self, user_id: UserId) -> AppResult<Vec<ActiveMatchRow>>;
}

/// Orders a pair so that (a, b) and (b, a) share one key
pub fn pair_key(user_a: UserId, user_b: UserId) -> (UserId, UserId) {
    if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    }
}
