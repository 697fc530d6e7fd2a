use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::job::Job;

/// Bounded FIFO admission queue (producer side).
///
/// Never blocks: a full queue rejects immediately and the rejected job's
/// flight is resolved with [`AppError::QueueFull`] so every joined caller
/// sees the rejection.
#[derive(Clone)]
pub struct AdmissionQueue {
    tx: mpsc::Sender<Job>,
}

/// Consumer side shared by all workers of a pool.
#[derive(Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl AdmissionQueue {
    /// Create a queue holding at most `capacity` pending jobs.
    ///
    /// `capacity` must be at least 1; [`crate::config::DispatcherConfig`]
    /// validates this before the queue is built.
    pub fn bounded(capacity: usize) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self { tx },
            QueueReceiver {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }

    /// Admit `job` or reject it without waiting.
    pub fn try_enqueue(&self, job: Job) -> Result<(), AppError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                let err = AppError::QueueFull {
                    capacity: self.capacity(),
                };
                job.completion.resolve(Err(err.clone()));
                Err(err)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                job.completion.resolve(Err(AppError::JobAbandoned));
                Err(AppError::JobAbandoned)
            }
        }
    }

    /// Number of jobs admitted but not yet taken by a worker.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl QueueReceiver {
    /// Take the next job, suspending while the queue is empty.
    ///
    /// Returns `None` once `cancel` fires or every producer is gone.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<Job> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            job = rx.recv() => job,
        }
    }

    /// Close the queue and resolve every job still waiting in it as
    /// abandoned. Returns how many were drained.
    pub async fn drain_abandoned(&self) -> usize {
        let mut rx = self.rx.lock().await;
        rx.close();

        let mut drained = 0;
        while let Ok(job) = rx.try_recv() {
            job.completion.resolve(Err(AppError::JobAbandoned));
            drained += 1;
        }
        drained
    }
}
