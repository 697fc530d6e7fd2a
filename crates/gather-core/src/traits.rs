use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::job::JobKind;

/// Runs one page extraction for a resource URL.
///
/// Implementations are synchronous and may block for a long time (a
/// browser session, an external process). The worker pool always calls
/// them from the blocking thread pool.
pub trait Extractor: Send + Sync {
    fn execute(&self, resource: &str) -> Result<serde_json::Value, AppError>;

    /// Run on behalf of worker slot `slot` (`0..pool size`).
    ///
    /// No two concurrent calls share a slot, so extractors that keep
    /// per-session state (a browser profile) can key it on `slot`.
    fn execute_in_slot(
        &self,
        resource: &str,
        slot: usize,
    ) -> Result<serde_json::Value, AppError> {
        let _ = slot;
        self.execute(resource)
    }
}

impl<F> Extractor for F
where
    F: Fn(&str) -> Result<serde_json::Value, AppError> + Send + Sync,
{
    fn execute(&self, resource: &str) -> Result<serde_json::Value, AppError> {
        self(resource)
    }
}

/// Lookup table from job kind to the extractor that serves it.
#[derive(Clone, Default)]
pub struct ExtractorTable {
    entries: HashMap<JobKind, Arc<dyn Extractor>>,
}

impl ExtractorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the extractor for `kind`.
    pub fn with(mut self, kind: JobKind, extractor: Arc<dyn Extractor>) -> Self {
        self.entries.insert(kind, extractor);
        self
    }

    /// Register one extractor for every known kind.
    pub fn for_all_kinds(extractor: Arc<dyn Extractor>) -> Self {
        JobKind::ALL
            .into_iter()
            .fold(Self::new(), |table, kind| table.with(kind, extractor.clone()))
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn Extractor>> {
        self.entries.get(&kind).cloned()
    }

    pub fn supports(&self, kind: JobKind) -> bool {
        self.entries.contains_key(&kind)
    }
}

impl std::fmt::Debug for ExtractorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorTable")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Raw key/value store with per-entry expiry.
///
/// Errors are reported as [`AppError::CacheUnavailable`]; callers decide
/// how to degrade (see [`crate::cache::ResultCache`]).
pub trait CacheStore: Send + Sync + Clone + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op CacheStore for use when caching is disabled.
#[derive(Debug, Clone)]
pub struct NullCache;

impl CacheStore for NullCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, AppError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), AppError> {
        Ok(())
    }
}
