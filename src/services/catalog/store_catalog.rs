use std::sync::Arc;

use crate::{
    db::MatchStore,
    error::AppResult,
    models::{ItemDetails, ItemId},
    services::catalog::CatalogProvider,
};

/// Serves details from the local `items` table, filled in when users like items
pub struct StoreCatalog {
    store: Arc<dyn MatchStore>,
}

impl StoreCatalog {
    pub fn new(store: Arc<dyn MatchStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl CatalogProvider for StoreCatalog {
    async fn get_item_details(&self, item_ids: &[ItemId]) -> AppResult<Vec<ItemDetails>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.store.item_details(item_ids).await
    }

    fn name(&self) -> &'static str {
        "store"
    }
}
