use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::error::AppError;
use crate::flight::Outcome;
use crate::job::Job;
use crate::queue::QueueReceiver;
use crate::traits::{CacheStore, ExtractorTable};

/// Events emitted by workers for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    JobTaken {
        worker_id: &'a str,
        job: &'a Job,
    },
    JobCompleted {
        worker_id: &'a str,
        job_id: Uuid,
        key: &'a str,
        elapsed: Duration,
    },
    JobFailed {
        worker_id: &'a str,
        job_id: Uuid,
        key: &'a str,
        error: &'a str,
    },
    JobServedFromCache {
        worker_id: &'a str,
        job_id: Uuid,
        key: &'a str,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::JobTaken { worker_id, job } => {
                tracing::info!(
                    %worker_id,
                    job_id = %job.id,
                    kind = %job.kind,
                    key = %job.key,
                    queue_wait_ms = job.queue_wait().num_milliseconds(),
                    "Job taken"
                );
            }
            WorkerEvent::JobCompleted {
                worker_id,
                job_id,
                key,
                elapsed,
            } => {
                tracing::info!(
                    %worker_id,
                    %job_id,
                    %key,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Job completed"
                );
            }
            WorkerEvent::JobFailed {
                worker_id,
                job_id,
                key,
                error,
            } => {
                tracing::warn!(%worker_id, %job_id, %key, %error, "Job failed");
            }
            WorkerEvent::JobServedFromCache {
                worker_id,
                job_id,
                key,
            } => {
                tracing::info!(%worker_id, %job_id, %key, "Job served from cache");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// One executor slot: takes a job, runs it to completion, publishes the
/// outcome, repeats.
struct Worker<C: CacheStore> {
    id: String,
    slot: usize,
    queue: QueueReceiver,
    cache: ResultCache<C>,
    extractors: ExtractorTable,
    running: Arc<AtomicUsize>,
}

impl<C: CacheStore> Worker<C> {
    async fn run<WR: WorkerReporter>(&self, cancel_token: CancellationToken, reporter: &WR) {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.id,
        });

        while let Some(job) = self.queue.next(&cancel_token).await {
            self.process_job(job, reporter).await;
        }

        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.id,
        });
    }

    async fn process_job<WR: WorkerReporter>(&self, job: Job, reporter: &WR) {
        reporter.report(WorkerEvent::JobTaken {
            worker_id: &self.id,
            job: &job,
        });

        // A caller that missed the cache just before the previous flight
        // for this key published becomes a new creator; serve it the
        // stored result instead of extracting again.
        if let Some(cached) = self.cache.get(&job.key).await {
            reporter.report(WorkerEvent::JobServedFromCache {
                worker_id: &self.id,
                job_id: job.id,
                key: &job.key,
            });
            job.completion.resolve(Ok(cached));
            return;
        }

        let started = Instant::now();
        let outcome = self.execute(&job).await;

        match &outcome {
            Ok(payload) => {
                // Cache before resolving so a request arriving right after the
                // flight is released finds the result instead of re-running it.
                self.cache.put(&job.key, payload).await;
                reporter.report(WorkerEvent::JobCompleted {
                    worker_id: &self.id,
                    job_id: job.id,
                    key: &job.key,
                    elapsed: started.elapsed(),
                });
            }
            Err(e) => {
                let error = e.to_string();
                reporter.report(WorkerEvent::JobFailed {
                    worker_id: &self.id,
                    job_id: job.id,
                    key: &job.key,
                    error: &error,
                });
            }
        }

        job.completion.resolve(outcome);
    }

    /// Run the blocking extraction off the async workers.
    async fn execute(&self, job: &Job) -> Outcome {
        let Some(extractor) = self.extractors.get(job.kind) else {
            return Err(AppError::UnsupportedKind(job.kind.to_string()));
        };

        let resource = job.resource.clone();
        let slot = self.slot;
        self.running.fetch_add(1, Ordering::SeqCst);
        let joined =
            tokio::task::spawn_blocking(move || extractor.execute_in_slot(&resource, slot)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        match joined {
            Ok(result) => result,
            Err(e) => Err(AppError::ExtractionFailure(format!(
                "extractor did not complete: {e}"
            ))),
        }
    }
}

/// Fixed-size set of workers draining one admission queue.
pub struct WorkerPool {
    size: usize,
    queue: QueueReceiver,
    running: Arc<AtomicUsize>,
    cancel_token: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Spawn `size` workers on the current tokio runtime.
    pub fn spawn<C, WR>(
        size: usize,
        queue: QueueReceiver,
        cache: ResultCache<C>,
        extractors: ExtractorTable,
        reporter: Arc<WR>,
    ) -> Self
    where
        C: CacheStore,
        WR: WorkerReporter + 'static,
    {
        let running = Arc::new(AtomicUsize::new(0));
        let cancel_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        for n in 0..size {
            let worker = Worker {
                id: format!("worker-{n}"),
                slot: n,
                queue: queue.clone(),
                cache: cache.clone(),
                extractors: extractors.clone(),
                running: running.clone(),
            };
            let cancel_token = cancel_token.clone();
            let reporter = reporter.clone();
            tracker.spawn(async move {
                worker.run(cancel_token, reporter.as_ref()).await;
            });
        }
        tracker.close();

        Self {
            size,
            queue,
            running,
            cancel_token,
            tracker,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs currently inside an extraction call.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop taking new jobs, wait for the ones in progress to finish, and
    /// resolve whatever is still queued as abandoned.
    ///
    /// Returns the number of queued jobs that were abandoned.
    pub async fn shutdown(&self) -> usize {
        self.cancel_token.cancel();
        self.tracker.wait().await;
        let abandoned = self.queue.drain_abandoned().await;
        if abandoned > 0 {
            tracing::warn!(abandoned, "Queued jobs abandoned at shutdown");
        }
        abandoned
    }
}
