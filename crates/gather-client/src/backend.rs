use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use gather_core::cache::MemoryCache;
use gather_core::error::AppError;
use gather_core::traits::{CacheStore, NullCache};

use crate::redis_cache::{RedisCache, RedisConfig};

/// Which cache backend to run with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheKind {
    #[default]
    Redis,
    Memory,
    None,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
            Self::None => "none",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            "none" | "off" => Ok(Self::None),
            other => Err(AppError::ConfigError(format!(
                "Unknown cache backend '{other}' (expected redis, memory or none)"
            ))),
        }
    }
}

/// Cache store selected at startup.
///
/// Enum dispatch keeps [`gather_core::Dispatcher`] monomorphic over one
/// store type whatever the configuration says.
#[derive(Clone)]
pub enum CacheBackend {
    Redis(RedisCache),
    Memory(MemoryCache),
    Disabled(NullCache),
}

impl CacheBackend {
    /// Build the backend for `kind`.
    ///
    /// A Redis server that cannot be reached at startup is not fatal: the
    /// failure is logged and caching is disabled for this process.
    pub async fn connect(kind: CacheKind, redis: &RedisConfig) -> Self {
        match kind {
            CacheKind::Redis => match RedisCache::connect(redis).await {
                Ok(cache) => Self::Redis(cache),
                Err(e) => {
                    tracing::warn!(
                        host = %redis.host,
                        port = redis.port,
                        error = %e,
                        "Redis unavailable, running without cache"
                    );
                    Self::Disabled(NullCache)
                }
            },
            CacheKind::Memory => Self::Memory(MemoryCache::default()),
            CacheKind::None => Self::Disabled(NullCache),
        }
    }

    /// Backend actually in use, after any fallback.
    pub fn kind(&self) -> CacheKind {
        match self {
            Self::Redis(_) => CacheKind::Redis,
            Self::Memory(_) => CacheKind::Memory,
            Self::Disabled(_) => CacheKind::None,
        }
    }
}

impl CacheStore for CacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        match self {
            Self::Redis(c) => c.get(key).await,
            Self::Memory(c) => c.get(key).await,
            Self::Disabled(c) => c.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        match self {
            Self::Redis(c) => c.set(key, value, ttl).await,
            Self::Memory(c) => c.set(key, value, ttl).await,
            Self::Disabled(c) => c.set(key, value, ttl).await,
        }
    }
}
