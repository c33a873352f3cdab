use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod events;

pub use events::{MatchEvent, SharedItem, UserSummary};

/// Users are issued by the upstream auth layer and identified by UUID
pub type UserId = Uuid;

/// Catalog (TMDB) movie id
pub type ItemId = i64;

pub type RoomId = Uuid;

/// A user's expressed interest in an item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Like {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub liked_at: DateTime<Utc>,
}

/// A directed, one-way expression of interest from `requestor_id` toward `target_user_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct MatchRequest {
    pub requestor_id: UserId,
    pub target_user_id: UserId,
    pub item_id: ItemId,
    pub created_at: DateTime<Utc>,
}

/// A user's participation in a room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Membership {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

/// Display metadata for an item, as provided by the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct ItemDetails {
    pub id: ItemId,
    pub title: String,
    pub image_ref: Option<String>,
    pub year: Option<i32>,
}

/// Relationship between two users, always derived from requests and memberships
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    None,
    PendingSent,
    PendingReceived,
    Matched,
}

impl PairStatus {
    pub fn can_match(self) -> bool {
        matches!(self, PairStatus::None | PairStatus::PendingReceived)
    }

    pub fn can_decline(self) -> bool {
        matches!(self, PairStatus::PendingReceived)
    }
}

/// Another user who shares liked items with the caller
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Candidate {
    pub other_user_id: UserId,
    pub overlap_count: i64,
    pub shared_item_ids: Vec<ItemId>,
    pub shared_item_details: Vec<ItemDetails>,
    pub pairwise_status: PairStatus,
    pub request_sent_at: Option<DateTime<Utc>>,
}

/// Result of a request or accept transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestOutcome {
    pub matched: bool,
    pub room_id: Option<RoomId>,
}

impl RequestOutcome {
    pub fn pending() -> Self {
        Self {
            matched: false,
            room_id: None,
        }
    }

    pub fn matched(room_id: RoomId) -> Self {
        Self {
            matched: true,
            room_id: Some(room_id),
        }
    }
}

/// Pairwise status as seen from one side, with the actions currently allowed
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusView {
    pub other_user_id: UserId,
    pub status: PairStatus,
    pub can_match: bool,
    pub can_decline: bool,
    pub room_id: Option<RoomId>,
}

/// A matched peer with its room and a summary of recent activity
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActiveMatch {
    pub other_user_id: UserId,
    pub display_name: Option<String>,
    pub room_id: RoomId,
    pub matched_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    /// Always complete, even when details are unavailable
    pub shared_item_ids: Vec<ItemId>,
    /// Details for those shared items the catalog could resolve
    pub shared_items: Vec<ItemDetails>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_status_serializes_snake_case() {
        let json = serde_json::to_string(&PairStatus::PendingReceived).unwrap();
        assert_eq!(json, "\"pending_received\"");
        let json = serde_json::to_string(&PairStatus::PendingSent).unwrap();
        assert_eq!(json, "\"pending_sent\"");
    }

    #[test]
    fn test_capabilities_per_status() {
        assert!(PairStatus::None.can_match());
        assert!(!PairStatus::None.can_decline());
        assert!(PairStatus::PendingReceived.can_match());
        assert!(PairStatus::PendingReceived.can_decline());
        assert!(!PairStatus::PendingSent.can_match());
        assert!(!PairStatus::Matched.can_match());
        assert!(!PairStatus::Matched.can_decline());
    }

    #[test]
    fn test_request_outcome_json_shape() {
        let json = serde_json::to_value(RequestOutcome::pending()).unwrap();
        assert_eq!(json, serde_json::json!({ "matched": false, "room_id": null }));
    }
}
