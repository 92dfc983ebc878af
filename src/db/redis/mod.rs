pub mod cache;
pub mod memory;

mod macros;

pub use cache::create_redis_client;
pub use cache::Cache;
pub use cache::CacheKey;
pub use cache::CacheStore;
pub use cache::CacheWriterHandle;
pub use cache::RedisStore;
pub use memory::MemoryStore;
