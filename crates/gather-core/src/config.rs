use std::time::Duration;

use crate::cache::DEFAULT_CACHE_TTL;
use crate::error::AppError;

/// Sizing and TTL for a [`crate::Dispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of concurrent workers (and therefore concurrent extractions).
    pub workers: usize,
    /// Maximum number of admitted jobs waiting for a worker.
    pub queue_capacity: usize,
    /// Uniform TTL for cached results.
    pub cache_ttl: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 200,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl DispatcherConfig {
    /// Read configuration from environment variables.
    ///
    /// - `PARSER_WORKERS` (optional, defaults to 5)
    /// - `PARSER_QUEUE_MAX` (optional, defaults to 200)
    /// - `CACHE_TTL_SECONDS` (optional, defaults to 259200)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let workers = parse_positive(&lookup, "PARSER_WORKERS")?.unwrap_or(defaults.workers);
        let queue_capacity =
            parse_positive(&lookup, "PARSER_QUEUE_MAX")?.unwrap_or(defaults.queue_capacity);
        let cache_ttl = parse_positive(&lookup, "CACHE_TTL_SECONDS")?
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(defaults.cache_ttl);

        Self {
            workers,
            queue_capacity,
            cache_ttl,
        }
        .validated()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Reject configurations the dispatcher cannot run with.
    pub fn validated(self) -> Result<Self, AppError> {
        if self.workers == 0 {
            return Err(AppError::ConfigError(
                "worker pool size must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::ConfigError(
                "queue capacity must be at least 1".into(),
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(AppError::ConfigError("cache TTL must be positive".into()));
        }
        Ok(self)
    }
}

fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<usize>, AppError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let parsed: usize = raw.parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {name} '{raw}': must be a positive integer"))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(format!("{name} must be at least 1")));
    }
    Ok(Some(parsed))
}
