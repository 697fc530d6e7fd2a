pub mod backend;
pub mod command;
pub mod redis_cache;

pub use backend::{CacheBackend, CacheKind};
pub use command::CommandExtractor;
pub use redis_cache::{RedisCache, RedisConfig};
