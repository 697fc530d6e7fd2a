use std::sync::Arc;

use serde::Serialize;

use crate::cache::ResultCache;
use crate::config::DispatcherConfig;
use crate::error::AppError;
use crate::flight::SingleFlightRegistry;
use crate::job::{Envelope, Job, JobKind};
use crate::key::derive_key;
use crate::queue::AdmissionQueue;
use crate::traits::{CacheStore, ExtractorTable};
use crate::worker::{TracingWorkerReporter, WorkerPool, WorkerReporter};

/// Read-only view of dispatcher load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub workers: usize,
    pub queue_capacity: usize,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub running: usize,
}

/// Entry point composing cache, single-flight registry, admission queue and
/// worker pool.
///
/// Request path: cache check → join or create flight → (creator) enqueue →
/// wait for the flight's outcome. Successful outcomes are written to the
/// cache by the worker before the flight is released.
///
/// Wrap in an `Arc` to share between request tasks.
pub struct Dispatcher<C: CacheStore> {
    cache: ResultCache<C>,
    flights: SingleFlightRegistry,
    queue: AdmissionQueue,
    extractors: ExtractorTable,
    pool: WorkerPool,
    config: DispatcherConfig,
}

impl<C: CacheStore> Dispatcher<C> {
    /// Start a dispatcher with a tracing-backed worker reporter.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: DispatcherConfig,
        store: C,
        extractors: ExtractorTable,
    ) -> Result<Self, AppError> {
        Self::start_with_reporter(config, store, extractors, Arc::new(TracingWorkerReporter))
    }

    pub fn start_with_reporter<WR: WorkerReporter + 'static>(
        config: DispatcherConfig,
        store: C,
        extractors: ExtractorTable,
        reporter: Arc<WR>,
    ) -> Result<Self, AppError> {
        let config = config.validated()?;
        let cache = ResultCache::new(store, config.cache_ttl);
        let (queue, rx) = AdmissionQueue::bounded(config.queue_capacity);
        let pool = WorkerPool::spawn(
            config.workers,
            rx,
            cache.clone(),
            extractors.clone(),
            reporter,
        );

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            cache_ttl_secs = config.cache_ttl.as_secs(),
            ?extractors,
            "Dispatcher started"
        );

        Ok(Self {
            cache,
            flights: SingleFlightRegistry::new(),
            queue,
            extractors,
            pool,
            config,
        })
    }

    /// Get the extraction result for `url`, running it at most once across
    /// concurrent identical requests.
    ///
    /// Dropping the returned future only detaches this caller: an admitted
    /// job still runs to completion and populates the cache.
    pub async fn submit(&self, kind: JobKind, url: &str) -> Result<serde_json::Value, AppError> {
        if !self.extractors.supports(kind) {
            return Err(AppError::UnsupportedKind(kind.to_string()));
        }

        let key = derive_key(kind, url);

        if let Some(cached) = self.cache.get(&key).await {
            tracing::info!(%key, %kind, "Cache hit");
            return Ok(cached);
        }

        // No await between join_or_create and try_enqueue: a caller dropped
        // here can never leave a registered flight without a job.
        let (handle, resolver) = self.flights.join_or_create(&key);
        match resolver {
            Some(resolver) => {
                let job = Job::new(kind, url.to_string(), key.clone(), resolver);
                let job_id = job.id;
                if let Err(e) = self.queue.try_enqueue(job) {
                    tracing::warn!(%key, %kind, error = %e, "Admission rejected");
                    return Err(e);
                }
                tracing::info!(
                    %key,
                    %kind,
                    %job_id,
                    queue_depth = self.queue.depth(),
                    in_flight = self.flights.in_flight(),
                    "Job enqueued"
                );
            }
            None => {
                tracing::info!(%key, %kind, "Joined in-flight request");
            }
        }

        handle.wait().await
    }

    /// [`submit`](Self::submit) wrapped in the `{success, data, error}`
    /// envelope.
    pub async fn submit_envelope(&self, kind: JobKind, url: &str) -> Envelope {
        Envelope::from(self.submit(kind, url).await)
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            workers: self.pool.size(),
            queue_capacity: self.queue.capacity(),
            queue_depth: self.queue.depth(),
            in_flight: self.flights.in_flight(),
            running: self.pool.running(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Let in-progress jobs finish, abandon queued ones, stop the workers.
    pub async fn shutdown(&self) -> usize {
        tracing::info!(health = ?self.health(), "Dispatcher shutting down");
        self.pool.shutdown().await
    }
}
