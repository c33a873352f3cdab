use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, RoomId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub id: UserId,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedItem {
    pub id: ItemId,
    /// Missing when the catalog could not be reached
    pub title: Option<String>,
}

/// Real-time events pushed to connected users
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvent {
    /// Sent to the target of a request that did not complete a match
    MatchRequestReceived {
        from_user: UserSummary,
        item: SharedItem,
    },
    /// Sent to both participants once their room exists
    MutualMatch {
        with_user: UserSummary,
        item: SharedItem,
        room_id: RoomId,
        matched_at: DateTime<Utc>,
    },
}

impl MatchEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MatchEvent::MatchRequestReceived { .. } => "match_request_received",
            MatchEvent::MutualMatch { .. } => "mutual_match",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_request_received_payload_is_tagged() {
        let user = Uuid::new_v4();
        let event = MatchEvent::MatchRequestReceived {
            from_user: UserSummary {
                id: user,
                display_name: Some("Ana".to_string()),
            },
            item: SharedItem {
                id: 550,
                title: Some("Fight Club".to_string()),
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "match_request_received");
        assert_eq!(json["from_user"]["display_name"], "Ana");
        assert_eq!(json["item"]["id"], 550);
        assert!(json.get("room_id").is_none());
    }

    #[test]
    fn test_mutual_match_carries_room_and_timestamp() {
        let room_id = Uuid::new_v4();
        let event = MatchEvent::MutualMatch {
            with_user: UserSummary {
                id: Uuid::new_v4(),
                display_name: None,
            },
            item: SharedItem { id: 27205, title: None },
            room_id,
            matched_at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
        assert_eq!(json["room_id"], room_id.to_string());
        assert!(json["matched_at"].is_string());
    }
}
