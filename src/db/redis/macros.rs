/// Read-through caching against [`Cache`](crate::db::Cache).
///
/// Returns the cached value on a hit. On a miss, or when Redis cannot be
/// read, awaits `$block`, queues the result for a background write with the
/// given TTL (seconds) and returns it. Evaluates to an `AppResult`, so it is
/// meant as the tail expression of a function returning one.
///
/// # Example
/// ```rust,ignore
/// async fn details(&self, id: ItemId) -> AppResult<ItemDetails> {
///     cached!(self.cache, CacheKey::ItemDetails(id), ITEM_CACHE_TTL, self.fetch_movie(id))
/// }
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        match $cache.get_from_cache(&$key).await {
            Ok(Some(hit)) => Ok(hit),
            lookup => {
                if let Err(e) = lookup {
                    tracing::warn!(error = %e, key = %$key, "Cache read failed, fetching fresh");
                }
                let value = $block.await?;
                $cache.set_in_background(&$key, &value, $ttl);
                Ok(value)
            }
        }
    }};
}
