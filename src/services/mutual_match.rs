use std::sync::Arc;

use crate::{
    db::{
        store::{RoomCreation, RoomOutcome},
        MatchStore,
    },
    error::AppResult,
    models::{ItemId, UserId},
    services::notifications::{Dispatch, Notifier},
};

/// Turns confirmed reciprocity into exactly one room per pair
///
/// The store performs the re-check, room insert, both memberships and request
/// retirement as one transaction. Concurrent callers for the same pair all
/// converge on the same room id; only the caller whose transaction wrote
/// announces the match.
#[derive(Clone)]
pub struct MutualMatchManager {
    store: Arc<dyn MatchStore>,
    notifier: Notifier,
}

impl MutualMatchManager {
    pub fn new(store: Arc<dyn MatchStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    pub async fn create_match(
        &self,
        user_a: UserId,
        user_b: UserId,
        item_id: ItemId,
    ) -> AppResult<RoomCreation> {
        let creation = self.store.create_room_for_pair(user_a, user_b).await?;

        match creation.outcome {
            RoomOutcome::Created => tracing::info!(
                user_a = %user_a,
                user_b = %user_b,
                item_id,
                room_id = %creation.room_id,
                "Mutual match, room created"
            ),
            RoomOutcome::Reactivated => tracing::info!(
                user_a = %user_a,
                user_b = %user_b,
                item_id,
                room_id = %creation.room_id,
                "Mutual match, existing room reactivated"
            ),
            RoomOutcome::Existing => tracing::debug!(
                user_a = %user_a,
                user_b = %user_b,
                room_id = %creation.room_id,
                "Pair already matched, converged on existing room"
            ),
        }

        if creation.wrote() {
            self.notifier.notify(Dispatch::MutualMatch {
                user_a,
                user_b,
                item_id,
                room_id: creation.room_id,
                matched_at: creation.matched_at,
            });
        }

        Ok(creation)
    }
}
