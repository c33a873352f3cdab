use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    db::{store::PairRoom, MatchStore},
    error::{AppError, AppResult},
    models::{
        ActiveMatch, ItemDetails, ItemId, MatchRequest, PairStatus, RequestOutcome, RoomId,
        StatusView, UserId,
    },
    services::{
        catalog::CatalogProvider,
        mutual_match::MutualMatchManager,
        notifications::{Dispatch, Notifier},
        retry::{optimistic_upsert, RetryPolicy, Upserted},
    },
};

/// Current request and room state between `user` and `other`, from `user`'s side
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairSnapshot {
    /// Requests `user` -> `other`, any item
    pub sent: Vec<MatchRequest>,
    /// Requests `other` -> `user`, any item
    pub received: Vec<MatchRequest>,
    pub room: Option<PairRoom>,
}

impl PairSnapshot {
    /// Derives the pairwise status
    ///
    /// Requests in both directions without a room only exist between a
    /// racing pair's inserts and the match that resolves them; that window
    /// reports `PendingReceived` so either side may complete it.
    pub fn status(&self) -> PairStatus {
        if self.room.is_some() {
            PairStatus::Matched
        } else if !self.received.is_empty() {
            PairStatus::PendingReceived
        } else if !self.sent.is_empty() {
            PairStatus::PendingSent
        } else {
            PairStatus::None
        }
    }
}

/// Match request state machine: request, accept, decline, status
pub struct MatchService {
    store: Arc<dyn MatchStore>,
    catalog: Arc<dyn CatalogProvider>,
    mutual: MutualMatchManager,
    notifier: Notifier,
    retry: RetryPolicy,
}

fn validate_pair(user_id: UserId, other_user_id: UserId) -> AppResult<()> {
    if user_id == other_user_id {
        return Err(AppError::InvalidInput(
            "Cannot match with yourself".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_item(item_id: ItemId) -> AppResult<()> {
    if item_id <= 0 {
        return Err(AppError::InvalidInput(format!(
            "Item id must be positive, got {}",
            item_id
        )));
    }
    Ok(())
}

impl MatchService {
    pub fn new(
        store: Arc<dyn MatchStore>,
        catalog: Arc<dyn CatalogProvider>,
        notifier: Notifier,
        retry: RetryPolicy,
    ) -> Self {
        let mutual = MutualMatchManager::new(store.clone(), notifier.clone());
        Self {
            store,
            catalog,
            mutual,
            notifier,
            retry,
        }
    }

    /// Reads the pair's requests and room; never cached between calls
    pub async fn pair_snapshot(
        &self,
        user_id: UserId,
        other_user_id: UserId,
    ) -> AppResult<PairSnapshot> {
        let others = [other_user_id];
        let (sent, received, rooms) = tokio::try_join!(
            self.store.requests_sent(user_id, &others),
            self.store.requests_received(user_id, &others),
            self.store.active_rooms_with(user_id, &others),
        )?;

        Ok(PairSnapshot {
            sent,
            received,
            room: rooms.into_iter().next(),
        })
    }

    /// `requestor_id` expresses interest in `target_user_id`, anchored on `item_id`
    ///
    /// Completes a match when any request exists in the other direction,
    /// whatever its item. Repeating the call returns the same outcome and
    /// writes nothing new.
    pub async fn request(
        &self,
        requestor_id: UserId,
        target_user_id: UserId,
        item_id: ItemId,
    ) -> AppResult<RequestOutcome> {
        validate_pair(requestor_id, target_user_id)?;
        validate_item(item_id)?;

        let snapshot = self.pair_snapshot(requestor_id, target_user_id).await?;

        if let Some(room) = snapshot.room {
            tracing::debug!(
                requestor_id = %requestor_id,
                target_user_id = %target_user_id,
                "Request for an already matched pair"
            );
            return Ok(RequestOutcome::matched(room.room_id));
        }

        if !snapshot.received.is_empty() {
            return self.complete_match(requestor_id, target_user_id, item_id).await;
        }

        let store = &self.store;
        let upserted = optimistic_upsert(self.retry, "match_request", || async move {
            if let Some(existing) = store
                .find_request(requestor_id, target_user_id, item_id)
                .await?
            {
                return Ok(Upserted::existing(existing));
            }
            let created = store
                .insert_request(requestor_id, target_user_id, item_id)
                .await?;
            Ok::<_, AppError>(Upserted::inserted(created))
        })
        .await?;

        // Between the first snapshot and our write the target may have requested
        // us (whoever re-checks second completes the match) or a room may have
        // committed (our row is then stale and retired here).
        let after = self.pair_snapshot(requestor_id, target_user_id).await?;

        if let Some(room) = after.room {
            self.store
                .delete_request(requestor_id, target_user_id, item_id)
                .await?;
            tracing::debug!(
                requestor_id = %requestor_id,
                target_user_id = %target_user_id,
                room_id = %room.room_id,
                "Room committed during request, retired the request row"
            );
            return Ok(RequestOutcome::matched(room.room_id));
        }

        if !after.received.is_empty() {
            return self.complete_match(requestor_id, target_user_id, item_id).await;
        }

        if upserted.inserted {
            tracing::info!(
                requestor_id = %requestor_id,
                target_user_id = %target_user_id,
                item_id,
                transition = "none -> pending_sent",
                "Match request recorded"
            );
            self.notifier.notify(Dispatch::RequestReceived {
                requestor_id,
                target_user_id,
                item_id,
            });
        } else {
            tracing::debug!(
                requestor_id = %requestor_id,
                target_user_id = %target_user_id,
                item_id,
                "Match request already pending"
            );
        }

        Ok(RequestOutcome::pending())
    }

    /// Accepts an inbound request from `requestor_id`
    ///
    /// Without a pending inbound request this is a no-op that reports the
    /// current state.
    pub async fn accept(
        &self,
        accepter_id: UserId,
        requestor_id: UserId,
        item_id: ItemId,
    ) -> AppResult<RequestOutcome> {
        validate_pair(accepter_id, requestor_id)?;
        validate_item(item_id)?;

        let snapshot = self.pair_snapshot(accepter_id, requestor_id).await?;

        if let Some(room) = snapshot.room {
            return Ok(RequestOutcome::matched(room.room_id));
        }

        if snapshot.received.is_empty() {
            tracing::debug!(
                accepter_id = %accepter_id,
                requestor_id = %requestor_id,
                "Accept without a pending request, nothing to do"
            );
            return Ok(RequestOutcome::pending());
        }

        self.complete_match(accepter_id, requestor_id, item_id).await
    }

    /// Silently removes the inbound request `requestor_id` -> `decliner_id` for `item_id`
    pub async fn decline(
        &self,
        decliner_id: UserId,
        requestor_id: UserId,
        item_id: ItemId,
    ) -> AppResult<()> {
        validate_pair(decliner_id, requestor_id)?;
        validate_item(item_id)?;

        let removed = self
            .store
            .delete_request(requestor_id, decliner_id, item_id)
            .await?;

        tracing::info!(
            decliner_id = %decliner_id,
            requestor_id = %requestor_id,
            item_id,
            removed,
            transition = "pending_received -> none",
            "Match request declined"
        );

        Ok(())
    }

    pub async fn get_status(&self, user_id: UserId, other_user_id: UserId) -> AppResult<StatusView> {
        validate_pair(user_id, other_user_id)?;

        let snapshot = self.pair_snapshot(user_id, other_user_id).await?;
        let status = snapshot.status();

        Ok(StatusView {
            other_user_id,
            status,
            can_match: status.can_match(),
            can_decline: status.can_decline(),
            room_id: snapshot.room.map(|room| room.room_id),
        })
    }

    /// Matched peers with room, last activity and shared items
    pub async fn list_active_matches(&self, user_id: UserId) -> AppResult<Vec<ActiveMatch>> {
        let rows = self.store.active_matches(user_id).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let others: Vec<UserId> = rows.iter().map(|row| row.other_user_id).collect();
        let shared = self.store.shared_likes(user_id, &others).await?;

        let mut shared_by_user: HashMap<UserId, Vec<ItemId>> = HashMap::new();
        for (other, item_id) in shared {
            shared_by_user.entry(other).or_default().push(item_id);
        }

        let mut all_items: Vec<ItemId> = shared_by_user.values().flatten().copied().collect();
        all_items.sort_unstable();
        all_items.dedup();
        let details = fetch_details(self.catalog.as_ref(), &all_items).await;

        Ok(rows
            .into_iter()
            .map(|row| {
                let shared_item_ids = shared_by_user
                    .remove(&row.other_user_id)
                    .unwrap_or_default();
                let shared_items = shared_item_ids
                    .iter()
                    .filter_map(|id| details.get(id).cloned())
                    .collect();
                ActiveMatch {
                    other_user_id: row.other_user_id,
                    display_name: row.display_name,
                    room_id: row.room_id,
                    matched_at: row.matched_at,
                    last_activity_at: row.last_activity_at,
                    last_message_preview: row.last_message_preview,
                    shared_item_ids,
                    shared_items,
                }
            })
            .collect())
    }

    /// Deactivates the caller's membership; the room and both rows remain
    pub async fn leave_room(&self, user_id: UserId, room_id: RoomId) -> AppResult<()> {
        self.set_membership(user_id, room_id, false).await
    }

    pub async fn rejoin_room(&self, user_id: UserId, room_id: RoomId) -> AppResult<()> {
        self.set_membership(user_id, room_id, true).await
    }

    async fn set_membership(&self, user_id: UserId, room_id: RoomId, active: bool) -> AppResult<()> {
        if !self
            .store
            .set_membership_active(room_id, user_id, active)
            .await?
        {
            return Err(AppError::NotFound(format!("room {}", room_id)));
        }
        tracing::info!(user_id = %user_id, room_id = %room_id, active, "Membership updated");
        Ok(())
    }

    async fn complete_match(
        &self,
        user_id: UserId,
        other_user_id: UserId,
        item_id: ItemId,
    ) -> AppResult<RequestOutcome> {
        let creation = self.mutual.create_match(user_id, other_user_id, item_id).await?;
        Ok(RequestOutcome::matched(creation.room_id))
    }
}

/// Catalog details keyed by id; an unavailable catalog yields none
pub(crate) async fn fetch_details(
    catalog: &dyn CatalogProvider,
    item_ids: &[ItemId],
) -> HashMap<ItemId, ItemDetails> {
    if item_ids.is_empty() {
        return HashMap::new();
    }

    match catalog.get_item_details(item_ids).await {
        Ok(details) => details.into_iter().map(|d| (d.id, d)).collect(),
        Err(e) => {
            tracing::warn!(
                error = %e,
                catalog = catalog.name(),
                item_count = item_ids.len(),
                "Item details unavailable, returning ids only"
            );
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::MatchEvent;
    use crate::realtime::ConnectionHub;
    use crate::services::catalog::{MockCatalogProvider, StoreCatalog};
    use crate::services::notifications::{DispatchContext, NotifierHandle};
    use std::time::Duration;
    use uuid::Uuid;

    struct Harness {
        store: Arc<MemoryStore>,
        hub: Arc<ConnectionHub>,
        service: Arc<MatchService>,
        _handle: NotifierHandle,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(ConnectionHub::new());
        let catalog: Arc<dyn CatalogProvider> = Arc::new(StoreCatalog::new(store.clone()));
        let (notifier, handle) = Notifier::spawn(DispatchContext {
            store: store.clone(),
            catalog: catalog.clone(),
            presence: hub.clone(),
            timeout: Duration::from_millis(200),
        });
        let service = Arc::new(MatchService::new(
            store.clone(),
            catalog,
            notifier,
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
        ));
        Harness {
            store,
            hub,
            service,
            _handle: handle,
        }
    }

    #[test]
    fn test_status_derivation() {
        let mut snapshot = PairSnapshot::default();
        assert_eq!(snapshot.status(), PairStatus::None);

        let request = MatchRequest {
            requestor_id: Uuid::new_v4(),
            target_user_id: Uuid::new_v4(),
            item_id: 550,
            created_at: chrono::Utc::now(),
        };
        snapshot.sent.push(request.clone());
        assert_eq!(snapshot.status(), PairStatus::PendingSent);

        snapshot.sent.clear();
        snapshot.received.push(request);
        assert_eq!(snapshot.status(), PairStatus::PendingReceived);

        snapshot.room = Some(PairRoom {
            other_user_id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            matched_at: chrono::Utc::now(),
        });
        assert_eq!(snapshot.status(), PairStatus::Matched);
    }

    #[tokio::test]
    async fn test_self_match_rejected_before_any_write() {
        let h = harness();
        let me = Uuid::new_v4();
        let err = h.service.request(me, me, 550).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(h.store.round_trips(), 0);
    }

    #[tokio::test]
    async fn test_non_positive_item_rejected() {
        let h = harness();
        let err = h
            .service
            .request(Uuid::new_v4(), Uuid::new_v4(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_repeated_request_is_idempotent() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let first = h.service.request(a, b, 550).await.unwrap();
        let second = h.service.request(a, b, 550).await.unwrap();

        assert_eq!(first, RequestOutcome::pending());
        assert_eq!(first, second);
        assert_eq!(h.store.request_count(), 1);
    }

    #[tokio::test]
    async fn test_reciprocal_request_matches_and_retires_requests() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        h.service.request(a, b, 550).await.unwrap();
        let outcome = h.service.request(b, a, 550).await.unwrap();

        assert!(outcome.matched);
        let room_id = outcome.room_id.unwrap();
        assert_eq!(h.store.request_count(), 0);
        assert_eq!(h.store.memberships(room_id).len(), 2);

        // Already matched: further requests report the same room
        let again = h.service.request(a, b, 550).await.unwrap();
        assert_eq!(again, RequestOutcome::matched(room_id));
    }

    #[tokio::test]
    async fn test_reciprocity_is_item_agnostic() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        h.service.request(a, b, 550).await.unwrap();
        let outcome = h.service.request(b, a, 27205).await.unwrap();

        assert!(outcome.matched);
        assert_eq!(h.store.request_count(), 0);
    }

    #[tokio::test]
    async fn test_decline_is_terminal_and_silent() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        h.service.request(a, b, 550).await.unwrap();

        let (_session, mut a_rx) = h.hub.connect(a).await;
        h.service.decline(b, a, 550).await.unwrap();
        // Declining twice is fine
        h.service.decline(b, a, 550).await.unwrap();

        let status = h.service.get_status(a, b).await.unwrap();
        assert_eq!(status.status, PairStatus::None);
        assert!(status.can_match);
        assert_eq!(h.store.request_count(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_status_from_both_sides() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        h.service.request(a, b, 550).await.unwrap();

        let from_a = h.service.get_status(a, b).await.unwrap();
        assert_eq!(from_a.status, PairStatus::PendingSent);
        assert!(!from_a.can_match);

        let from_b = h.service.get_status(b, a).await.unwrap();
        assert_eq!(from_b.status, PairStatus::PendingReceived);
        assert!(from_b.can_match);
        assert!(from_b.can_decline);
        assert!(from_b.room_id.is_none());
    }

    #[tokio::test]
    async fn test_accept_without_request_is_noop() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let outcome = h.service.accept(a, b, 550).await.unwrap();
        assert_eq!(outcome, RequestOutcome::pending());
        assert_eq!(h.store.room_count(), 0);
        assert_eq!(h.store.request_count(), 0);
    }

    #[tokio::test]
    async fn test_accept_completes_pending_request() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        h.service.request(a, b, 550).await.unwrap();

        let outcome = h.service.accept(b, a, 550).await.unwrap();
        assert!(outcome.matched);

        let status = h.service.get_status(a, b).await.unwrap();
        assert_eq!(status.status, PairStatus::Matched);
        assert_eq!(status.room_id, outcome.room_id);
        assert!(!status.can_match);
    }

    #[tokio::test]
    async fn test_request_notifies_target_once() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (_session, mut b_rx) = h.hub.connect(b).await;

        h.service.request(a, b, 550).await.unwrap();
        h.service.request(a, b, 550).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), "match_request_received");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_match_notifies_both_participants() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        h.service.request(a, b, 550).await.unwrap();

        let (_sa, mut a_rx) = h.hub.connect(a).await;
        let (_sb, mut b_rx) = h.hub.connect(b).await;
        let outcome = h.service.request(b, a, 550).await.unwrap();

        for rx in [&mut a_rx, &mut b_rx] {
            // b may also see the earlier request event, depending on when it connected
            loop {
                let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                    .await
                    .unwrap()
                    .unwrap();
                if let MatchEvent::MutualMatch { room_id, .. } = event {
                    assert_eq!(Some(room_id), outcome.room_id);
                    break;
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_requests_still_match_once() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut tasks = Vec::new();
        for i in 0..10 {
            let service = h.service.clone();
            let (x, y) = if i % 2 == 0 { (a, b) } else { (b, a) };
            tasks.push(tokio::spawn(async move { service.request(x, y, 550).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let status = h.service.get_status(a, b).await.unwrap();
        assert_eq!(status.status, PairStatus::Matched);
        assert_eq!(h.store.room_count(), 1);
        let memberships = h.store.memberships(status.room_id.unwrap());
        assert_eq!(memberships.len(), 2);
        assert!(memberships.iter().all(|m| m.is_active));
    }

    #[tokio::test]
    async fn test_leave_and_rematch_reuses_room() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        h.service.request(a, b, 550).await.unwrap();
        let room_id = h.service.request(b, a, 550).await.unwrap().room_id.unwrap();

        h.service.leave_room(a, room_id).await.unwrap();
        assert_eq!(
            h.service.get_status(b, a).await.unwrap().status,
            PairStatus::None
        );

        h.service.request(b, a, 550).await.unwrap();
        let outcome = h.service.request(a, b, 550).await.unwrap();
        assert_eq!(outcome, RequestOutcome::matched(room_id));
        assert_eq!(h.store.room_count(), 1);
    }

    #[tokio::test]
    async fn test_leave_unknown_room_is_not_found() {
        let h = harness();
        let err = h
            .service
            .leave_room(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_active_matches_include_shared_items() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        h.store.add_user(b, "Bea");
        for user in [a, b] {
            h.store.insert_like(user, 550).await.unwrap();
        }
        h.store.insert_like(a, 27205).await.unwrap();
        h.store
            .upsert_item(&ItemDetails {
                id: 550,
                title: "Fight Club".to_string(),
                image_ref: None,
                year: Some(1999),
            })
            .await
            .unwrap();

        h.service.request(a, b, 550).await.unwrap();
        let room_id = h.service.request(b, a, 550).await.unwrap().room_id.unwrap();

        let matches = h.service.list_active_matches(a).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].room_id, room_id);
        assert_eq!(matches[0].display_name.as_deref(), Some("Bea"));
        assert_eq!(matches[0].shared_item_ids, vec![550]);
        assert_eq!(matches[0].shared_items.len(), 1);
        assert_eq!(matches[0].shared_items[0].title, "Fight Club");
    }

    #[tokio::test]
    async fn test_active_matches_keep_shared_ids_when_catalog_fails() {
        let h = harness();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for user in [a, b] {
            h.store.insert_like(user, 550).await.unwrap();
        }
        let room = h.store.create_room_for_pair(a, b).await.unwrap();

        let mut catalog = MockCatalogProvider::new();
        catalog
            .expect_get_item_details()
            .returning(|_| Err(AppError::ExternalApi("catalog down".to_string())));
        catalog.expect_name().return_const("mock");
        let (notifier, _handle) = Notifier::spawn(DispatchContext {
            store: h.store.clone(),
            catalog: Arc::new(StoreCatalog::new(h.store.clone())),
            presence: h.hub.clone(),
            timeout: Duration::from_millis(200),
        });
        let service = MatchService::new(
            h.store.clone(),
            Arc::new(catalog),
            notifier,
            RetryPolicy::default(),
        );

        let matches = service.list_active_matches(a).await.unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].room_id, room.room_id);
        assert_eq!(matches[0].shared_item_ids, vec![550]);
        assert!(matches[0].shared_items.is_empty());
    }
}
