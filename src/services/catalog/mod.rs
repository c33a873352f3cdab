//! Item detail lookup
//!
//! Details only decorate candidate and notification output, so callers treat
//! a failing provider as "no details" rather than failing their operation.

use crate::{
    error::AppResult,
    models::{ItemDetails, ItemId},
};

pub mod store_catalog;
pub mod tmdb;

pub use store_catalog::StoreCatalog;
pub use tmdb::TmdbCatalog;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Details for as many of `item_ids` as are known, in no particular order
    async fn get_item_details(&self, item_ids: &[ItemId]) -> AppResult<Vec<ItemDetails>>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}
