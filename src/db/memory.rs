use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::{
    db::store::{
        pair_key, ActiveMatchRow, MatchStore, OverlapRow, PairRoom, RoomCreation, RoomOutcome,
    },
    error::{AppError, AppResult},
    models::{ItemDetails, ItemId, Like, MatchRequest, Membership, RoomId, UserId},
};

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone)]
struct StoredRoom {
    id: RoomId,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    room_id: RoomId,
    body: String,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, String>,
    items: HashMap<ItemId, ItemDetails>,
    likes: BTreeMap<(UserId, ItemId), DateTime<Utc>>,
    requests: BTreeMap<(UserId, UserId, ItemId), DateTime<Utc>>,
    rooms: HashMap<(UserId, UserId), StoredRoom>,
    memberships: BTreeMap<(RoomId, UserId), Membership>,
    messages: Vec<StoredMessage>,
}

/// In-process store with the same constraints as the Postgres schema
///
/// A single mutex stands in for transaction isolation. Every trait call counts
/// as one store round-trip.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    round_trips: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store calls made so far
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub fn reset_round_trips(&self) {
        self.round_trips.store(0, Ordering::SeqCst);
    }

    /// Registers a display name, as the auth layer would
    pub fn add_user(&self, user_id: UserId, display_name: &str) {
        self.lock().users.insert(user_id, display_name.to_string());
    }

    /// Appends a chat message, as the chat layer would
    pub fn record_message(&self, room_id: RoomId, body: &str) {
        self.lock().messages.push(StoredMessage {
            room_id,
            body: body.to_string(),
            created_at: Utc::now(),
        });
    }

    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn memberships(&self, room_id: RoomId) -> Vec<Membership> {
        self.lock()
            .memberships
            .values()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // Writes never span a panic point, so poisoned tables are still consistent
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        self.lock()
    }
}

impl Tables {
    fn pair_is_active(&self, room_id: RoomId, a: UserId, b: UserId) -> bool {
        [a, b].iter().all(|user| {
            self.memberships
                .get(&(room_id, *user))
                .map(|m| m.is_active)
                .unwrap_or(false)
        })
    }

    fn retire_pair_requests(&mut self, a: UserId, b: UserId) {
        self.requests.retain(|(requestor, target, _), _| {
            !((*requestor == a && *target == b) || (*requestor == b && *target == a))
        });
    }
}

fn to_request(key: &(UserId, UserId, ItemId), created_at: &DateTime<Utc>) -> MatchRequest {
    MatchRequest {
        requestor_id: key.0,
        target_user_id: key.1,
        item_id: key.2,
        created_at: *created_at,
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn find_like(&self, user_id: UserId, item_id: ItemId) -> AppResult<Option<Like>> {
        let tables = self.begin();
        Ok(tables.likes.get(&(user_id, item_id)).map(|liked_at| Like {
            user_id,
            item_id,
            liked_at: *liked_at,
        }))
    }

    async fn insert_like(&self, user_id: UserId, item_id: ItemId) -> AppResult<Like> {
        let mut tables = self.begin();
        if tables.likes.contains_key(&(user_id, item_id)) {
            return Err(AppError::Conflict(format!(
                "like ({}, {}) already exists",
                user_id, item_id
            )));
        }
        let liked_at = Utc::now();
        tables.likes.insert((user_id, item_id), liked_at);
        Ok(Like {
            user_id,
            item_id,
            liked_at,
        })
    }

    async fn delete_like(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool> {
        Ok(self.begin().likes.remove(&(user_id, item_id)).is_some())
    }

    async fn list_likes(&self, user_id: UserId) -> AppResult<Vec<Like>> {
        let tables = self.begin();
        let mut likes: Vec<Like> = tables
            .likes
            .iter()
            .filter(|((owner, _), _)| *owner == user_id)
            .map(|((_, item_id), liked_at)| Like {
                user_id,
                item_id: *item_id,
                liked_at: *liked_at,
            })
            .collect();
        likes.sort_by(|a, b| b.liked_at.cmp(&a.liked_at).then(a.item_id.cmp(&b.item_id)));
        Ok(likes)
    }

    async fn upsert_item(&self, item: &ItemDetails) -> AppResult<()> {
        let mut tables = self.begin();
        let merged = match tables.items.get(&item.id) {
            Some(existing) => ItemDetails {
                id: item.id,
                title: item.title.clone(),
                image_ref: item.image_ref.clone().or_else(|| existing.image_ref.clone()),
                year: item.year.or(existing.year),
            },
            None => item.clone(),
        };
        tables.items.insert(item.id, merged);
        Ok(())
    }

    async fn item_details(&self, item_ids: &[ItemId]) -> AppResult<Vec<ItemDetails>> {
        let tables = self.begin();
        Ok(item_ids
            .iter()
            .filter_map(|id| tables.items.get(id).cloned())
            .collect())
    }

    async fn display_names(&self, user_ids: &[UserId]) -> AppResult<HashMap<UserId, String>> {
        let tables = self.begin();
        Ok(user_ids
            .iter()
            .filter_map(|id| tables.users.get(id).map(|name| (*id, name.clone())))
            .collect())
    }

    async fn overlapping_users(
        &self,
        user_id: UserId,
        item_ids: &[ItemId],
    ) -> AppResult<Vec<OverlapRow>> {
        let tables = self.begin();
        let wanted: HashSet<ItemId> = item_ids.iter().copied().collect();
        let mut grouped: BTreeMap<UserId, OverlapRow> = BTreeMap::new();

        for ((owner, item_id), liked_at) in &tables.likes {
            if *owner == user_id || !wanted.contains(item_id) {
                continue;
            }
            let row = grouped.entry(*owner).or_insert_with(|| OverlapRow {
                user_id: *owner,
                overlap_count: 0,
                shared_item_ids: Vec::new(),
                latest_liked_at: *liked_at,
            });
            row.overlap_count += 1;
            row.shared_item_ids.push(*item_id);
            row.latest_liked_at = row.latest_liked_at.max(*liked_at);
        }

        Ok(grouped.into_values().collect())
    }

    async fn shared_likes(
        &self,
        user_id: UserId,
        others: &[UserId],
    ) -> AppResult<Vec<(UserId, ItemId)>> {
        let tables = self.begin();
        let others: HashSet<UserId> = others.iter().copied().collect();
        Ok(tables
            .likes
            .keys()
            .filter(|(owner, item_id)| {
                others.contains(owner) && tables.likes.contains_key(&(user_id, *item_id))
            })
            .copied()
            .collect())
    }

    async fn find_request(
        &self,
        requestor_id: UserId,
        target_user_id: UserId,
        item_id: ItemId,
    ) -> AppResult<Option<MatchRequest>> {
        let tables = self.begin();
        let key = (requestor_id, target_user_id, item_id);
        Ok(tables
            .requests
            .get(&key)
            .map(|created_at| to_request(&key, created_at)))
    }

    async fn insert_request(
        &self,
        requestor_id: UserId,
        target_user_id: UserId,
        item_id: ItemId,
    ) -> AppResult<MatchRequest> {
        let mut tables = self.begin();
        let key = (requestor_id, target_user_id, item_id);
        if tables.requests.contains_key(&key) {
            return Err(AppError::Conflict(format!(
                "match request {} -> {} for item {} already exists",
                requestor_id, target_user_id, item_id
            )));
        }
        let created_at = Utc::now();
        tables.requests.insert(key, created_at);
        Ok(to_request(&key, &created_at))
    }

    async fn delete_request(
        &self,
        requestor_id: UserId,
        target_user_id: UserId,
        item_id: ItemId,
    ) -> AppResult<bool> {
        Ok(self
            .begin()
            .requests
            .remove(&(requestor_id, target_user_id, item_id))
            .is_some())
    }

    async fn requests_sent(
        &self,
        requestor_id: UserId,
        targets: &[UserId],
    ) -> AppResult<Vec<MatchRequest>> {
        let tables = self.begin();
        let targets: HashSet<UserId> = targets.iter().copied().collect();
        Ok(tables
            .requests
            .iter()
            .filter(|((requestor, target, _), _)| *requestor == requestor_id && targets.contains(target))
            .map(|(key, created_at)| to_request(key, created_at))
            .collect())
    }

    async fn requests_received(
        &self,
        target_user_id: UserId,
        requestors: &[UserId],
    ) -> AppResult<Vec<MatchRequest>> {
        let tables = self.begin();
        let requestors: HashSet<UserId> = requestors.iter().copied().collect();
        Ok(tables
            .requests
            .iter()
            .filter(|((requestor, target, _), _)| {
                *target == target_user_id && requestors.contains(requestor)
            })
            .map(|(key, created_at)| to_request(key, created_at))
            .collect())
    }

    async fn active_rooms_with(
        &self,
        user_id: UserId,
        others: &[UserId],
    ) -> AppResult<Vec<PairRoom>> {
        let tables = self.begin();
        Ok(others
            .iter()
            .filter_map(|other| {
                let room = tables.rooms.get(&pair_key(user_id, *other))?;
                tables
                    .pair_is_active(room.id, user_id, *other)
                    .then(|| PairRoom {
                        other_user_id: *other,
                        room_id: room.id,
                        matched_at: room.created_at,
                    })
            })
            .collect())
    }

    async fn create_room_for_pair(&self, user_a: UserId, user_b: UserId) -> AppResult<RoomCreation> {
        let mut tables = self.begin();
        let key = pair_key(user_a, user_b);

        if let Some(room) = tables.rooms.get(&key).cloned() {
            if tables.pair_is_active(room.id, user_a, user_b) {
                return Ok(RoomCreation {
                    room_id: room.id,
                    matched_at: room.created_at,
                    outcome: RoomOutcome::Existing,
                });
            }

            let now = Utc::now();
            for user in [user_a, user_b] {
                if let Some(membership) = tables.memberships.get_mut(&(room.id, user)) {
                    if !membership.is_active {
                        membership.is_active = true;
                        membership.left_at = None;
                        membership.joined_at = now;
                    }
                }
            }
            tables.retire_pair_requests(user_a, user_b);
            return Ok(RoomCreation {
                room_id: room.id,
                matched_at: now,
                outcome: RoomOutcome::Reactivated,
            });
        }

        let room = StoredRoom {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        for user in [key.0, key.1] {
            tables.memberships.insert(
                (room.id, user),
                Membership {
                    room_id: room.id,
                    user_id: user,
                    is_active: true,
                    joined_at: room.created_at,
                    left_at: None,
                },
            );
        }
        tables.rooms.insert(key, room.clone());
        tables.retire_pair_requests(user_a, user_b);

        Ok(RoomCreation {
            room_id: room.id,
            matched_at: room.created_at,
            outcome: RoomOutcome::Created,
        })
    }

    async fn set_membership_active(
        &self,
        room_id: RoomId,
        user_id: UserId,
        active: bool,
    ) -> AppResult<bool> {
        let mut tables = self.begin();
        let Some(membership) = tables.memberships.get_mut(&(room_id, user_id)) else {
            return Ok(false);
        };
        if membership.is_active != active {
            let now = Utc::now();
            membership.is_active = active;
            if active {
                membership.joined_at = now;
                membership.left_at = None;
            } else {
                membership.left_at = Some(now);
            }
        }
        Ok(true)
    }

    async fn active_matches(&self, user_id: UserId) -> AppResult<Vec<ActiveMatchRow>> {
        let tables = self.begin();
        let mut rows: Vec<ActiveMatchRow> = tables
            .rooms
            .iter()
            .filter_map(|((low, high), room)| {
                let other = if *low == user_id {
                    *high
                } else if *high == user_id {
                    *low
                } else {
                    return None;
                };
                if !tables.pair_is_active(room.id, user_id, other) {
                    return None;
                }
                let last = tables
                    .messages
                    .iter()
                    .filter(|m| m.room_id == room.id)
                    .max_by_key(|m| m.created_at);
                Some(ActiveMatchRow {
                    other_user_id: other,
                    display_name: tables.users.get(&other).cloned(),
                    room_id: room.id,
                    matched_at: room.created_at,
                    last_activity_at: last.map(|m| m.created_at),
                    last_message_preview: last
                        .map(|m| m.body.chars().take(PREVIEW_CHARS).collect()),
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            let a_at = a.last_activity_at.unwrap_or(a.matched_at);
            let b_at = b.last_activity_at.unwrap_or(b.matched_at);
            b_at.cmp(&a_at)
        });
        Ok(rows)
    }
}
