use std::sync::Arc;

use crate::{
    db::MatchStore,
    error::{AppError, AppResult},
    models::{ItemDetails, ItemId, Like, UserId},
    services::{
        matching::validate_item,
        retry::{optimistic_upsert, RetryPolicy, Upserted},
    },
};

/// Records which items a user likes
pub struct LikeService {
    store: Arc<dyn MatchStore>,
    retry: RetryPolicy,
}

impl LikeService {
    pub fn new(store: Arc<dyn MatchStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Idempotently likes `item_id`, storing display details when the client sent them
    pub async fn like(
        &self,
        user_id: UserId,
        item_id: ItemId,
        details: Option<ItemDetails>,
    ) -> AppResult<Upserted<Like>> {
        validate_item(item_id)?;

        if let Some(mut details) = details {
            if details.title.trim().is_empty() {
                return Err(AppError::InvalidInput(
                    "Item title must not be empty".to_string(),
                ));
            }
            details.id = item_id;
            self.store.upsert_item(&details).await?;
        }

        let store = &self.store;
        let upserted = optimistic_upsert(self.retry, "like", || async move {
            if let Some(existing) = store.find_like(user_id, item_id).await? {
                return Ok(Upserted::existing(existing));
            }
            let created = store.insert_like(user_id, item_id).await?;
            Ok::<_, AppError>(Upserted::inserted(created))
        })
        .await?;

        if upserted.inserted {
            tracing::info!(user_id = %user_id, item_id, "Item liked");
        }

        Ok(upserted)
    }

    /// Removing a like that does not exist is not an error
    pub async fn unlike(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool> {
        validate_item(item_id)?;
        let removed = self.store.delete_like(user_id, item_id).await?;
        tracing::info!(user_id = %user_id, item_id, removed, "Item unliked");
        Ok(removed)
    }

    pub async fn list(&self, user_id: UserId) -> AppResult<Vec<Like>> {
        self.store.list_likes(user_id).await
    }
}
