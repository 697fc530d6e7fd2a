//! Result caching.
//!
//! [`ResultCache`] sits between the dispatcher and a raw [`CacheStore`]. It
//! owns the JSON wire format and the TTL, and turns every store failure into
//! a miss (reads) or a dropped write, so an unreachable backend only costs
//! extra executions and never fails a request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;

use crate::error::AppError;
use crate::traits::CacheStore;

/// Default cache TTL: 3 days.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(259_200);

/// Best-effort, JSON-encoding view over a [`CacheStore`].
#[derive(Clone)]
pub struct ResultCache<C: CacheStore> {
    store: C,
    ttl: Duration,
}

impl<C: CacheStore> ResultCache<C> {
    pub fn new(store: C, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    /// Look up a cached payload. Store errors and undecodable values are
    /// reported as a miss.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(%key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(%key, error = %e, "Cached value is not valid JSON, treating as miss");
                None
            }
        }
    }

    /// Store a successful payload. Failures are logged and dropped.
    pub async fn put(&self, key: &str, payload: &serde_json::Value) {
        let raw = payload.to_string();
        match self.store.set(key, &raw, self.ttl).await {
            Ok(()) => {
                tracing::debug!(%key, bytes = raw.len(), ttl_secs = self.ttl.as_secs(), "Result cached");
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "Cache write failed, result not cached");
            }
        }
    }
}

/// Per-entry expiry: each value carries the TTL it was written with.
struct EntryTtl;

impl Expiry<String, (Arc<str>, Duration)> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &(Arc<str>, Duration),
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.1)
    }

    // Overwriting restarts the clock, like `SET .. EX`.
    fn expire_after_update(
        &self,
        _key: &String,
        value: &(Arc<str>, Duration),
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.1)
    }
}

/// In-process [`CacheStore`] backed by `moka`.
///
/// Not shared across processes; used when no external backend is
/// configured and in tests.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Cache<String, (Arc<str>, Duration)>,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryTtl)
            .build();
        Self { inner }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.inner.get(key).await.map(|(raw, _)| raw.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        self.inner
            .insert(key.to_string(), (Arc::from(value), ttl))
            .await;
        Ok(())
    }
}
