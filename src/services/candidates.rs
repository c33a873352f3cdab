use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    db::MatchStore,
    error::AppResult,
    models::{Candidate, ItemId, MatchRequest, PairStatus, UserId},
    services::{catalog::CatalogProvider, matching::fetch_details},
};

/// Ranks other users by how many liked items they share with the caller
///
/// Store round-trips per call are fixed (likes, overlap, rooms, sent and
/// received requests, item details), whatever the number of candidates.
pub struct CandidateRanker {
    store: Arc<dyn MatchStore>,
    catalog: Arc<dyn CatalogProvider>,
    default_limit: usize,
    max_limit: usize,
}

impl CandidateRanker {
    pub fn new(
        store: Arc<dyn MatchStore>,
        catalog: Arc<dyn CatalogProvider>,
        default_limit: usize,
        max_limit: usize,
    ) -> Self {
        Self {
            store,
            catalog,
            default_limit,
            max_limit: max_limit.max(1),
        }
    }

    /// Missing or non-positive limits fall back to the default; large ones are capped
    pub fn clamp_limit(&self, requested: Option<i64>) -> usize {
        match requested {
            Some(limit) if limit > 0 => (limit as u64).min(self.max_limit as u64) as usize,
            _ => self.default_limit.clamp(1, self.max_limit),
        }
    }

    pub async fn get_candidates(
        &self,
        user_id: UserId,
        limit: Option<i64>,
    ) -> AppResult<Vec<Candidate>> {
        let limit = self.clamp_limit(limit);

        let likes = self.store.list_likes(user_id).await?;
        if likes.is_empty() {
            tracing::debug!(user_id = %user_id, "No likes, no candidates");
            return Ok(Vec::new());
        }
        let liked: Vec<ItemId> = likes.iter().map(|like| like.item_id).collect();

        let overlaps = self.store.overlapping_users(user_id, &liked).await?;
        if overlaps.is_empty() {
            tracing::debug!(user_id = %user_id, liked = liked.len(), "No overlapping users");
            return Ok(Vec::new());
        }
        let others: Vec<UserId> = overlaps.iter().map(|row| row.user_id).collect();

        let (rooms, sent, received) = tokio::try_join!(
            self.store.active_rooms_with(user_id, &others),
            self.store.requests_sent(user_id, &others),
            self.store.requests_received(user_id, &others),
        )?;

        let matched: HashSet<UserId> = rooms.iter().map(|room| room.other_user_id).collect();
        let sent_at = latest_by(&sent, |r| r.target_user_id);
        let received_from: HashSet<UserId> = received.iter().map(|r| r.requestor_id).collect();

        let mut ranked: Vec<(Candidate, DateTime<Utc>)> = overlaps
            .into_iter()
            .filter(|row| !matched.contains(&row.user_id))
            .map(|row| {
                let request_sent_at = sent_at.get(&row.user_id).copied();
                let pairwise_status = if received_from.contains(&row.user_id) {
                    PairStatus::PendingReceived
                } else if request_sent_at.is_some() {
                    PairStatus::PendingSent
                } else {
                    PairStatus::None
                };
                let candidate = Candidate {
                    other_user_id: row.user_id,
                    overlap_count: row.overlap_count,
                    shared_item_ids: row.shared_item_ids,
                    shared_item_details: Vec::new(),
                    pairwise_status,
                    request_sent_at,
                };
                (candidate, row.latest_liked_at)
            })
            .collect();

        ranked.sort_by(|(a, a_at), (b, b_at)| {
            b.overlap_count
                .cmp(&a.overlap_count)
                .then_with(|| b_at.cmp(a_at))
        });
        ranked.truncate(limit);

        let mut item_ids: Vec<ItemId> = ranked
            .iter()
            .flat_map(|(candidate, _)| candidate.shared_item_ids.iter().copied())
            .collect();
        item_ids.sort_unstable();
        item_ids.dedup();
        let details = fetch_details(self.catalog.as_ref(), &item_ids).await;

        let candidates: Vec<Candidate> = ranked
            .into_iter()
            .map(|(mut candidate, _)| {
                candidate.shared_item_details = candidate
                    .shared_item_ids
                    .iter()
                    .filter_map(|id| details.get(id).cloned())
                    .collect();
                candidate
            })
            .collect();

        tracing::info!(
            user_id = %user_id,
            candidate_count = candidates.len(),
            excluded_matched = matched.len(),
            limit,
            "Candidates ranked"
        );

        Ok(candidates)
    }
}

/// Most recent request time per key
fn latest_by<F>(requests: &[MatchRequest], key: F) -> HashMap<UserId, DateTime<Utc>>
where
    F: Fn(&MatchRequest) -> UserId,
{
    let mut latest: HashMap<UserId, DateTime<Utc>> = HashMap::new();
    for request in requests {
        latest
            .entry(key(request))
            .and_modify(|at| *at = (*at).max(request.created_at))
            .or_insert(request.created_at);
    }
    latest
}
