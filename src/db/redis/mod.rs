//! Redis-backed read-through cache for catalog lookups

pub mod cache;

mod macros;

pub use cache::{create_redis_client, Cache, CacheKey, CacheWriterHandle};
