pub mod memory;
pub mod pg_store;
pub mod postgres;
pub mod redis;
pub mod store;

pub use memory::MemoryStore;
pub use pg_store::PgStore;
pub use postgres::create_pool;
pub use redis::create_redis_client;
pub use redis::Cache;
pub use redis::CacheKey;
pub use store::MatchStore;
