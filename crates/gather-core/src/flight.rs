//! Single-flight registry: at most one outstanding execution per cache key.
//!
//! The first caller for a key becomes the creator and receives a
//! [`Resolver`]; everyone else joins and only gets a [`CompletionHandle`].
//! Completion fans out through a `tokio::sync::watch` channel that is written
//! exactly once, so any number of joiners observe the same terminal value.
//!
//! ```text
//! join_or_create(key) ──▶ creator  ──▶ Resolver ──▶ worker ──▶ resolve(outcome)
//!                    └──▶ joiners ──▶ CompletionHandle::wait ◀───────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::AppError;

/// Terminal value of one job, shared by every caller joined on its key.
pub type Outcome = Result<serde_json::Value, AppError>;

type Slot = Option<Outcome>;

struct FlightEntry {
    id: u64,
    rx: watch::Receiver<Slot>,
}

#[derive(Default)]
struct RegistryInner {
    flights: Mutex<HashMap<String, FlightEntry>>,
    next_id: AtomicU64,
}

/// Process-wide table of in-progress executions keyed by cache key.
#[derive(Clone, Default)]
pub struct SingleFlightRegistry {
    inner: Arc<RegistryInner>,
}

impl SingleFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the registry lock, recovering from poison if necessary.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, FlightEntry>> {
        self.inner.flights.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned single-flight registry");
            poisoned.into_inner()
        })
    }

    /// Join the in-flight execution for `key`, or register a new one.
    ///
    /// Exactly one concurrent caller per key gets `Some(resolver)` back and
    /// is responsible for getting the job executed.
    pub fn join_or_create(&self, key: &str) -> (CompletionHandle, Option<Resolver>) {
        let mut flights = self.lock();

        if let Some(entry) = flights.get(key) {
            return (
                CompletionHandle {
                    rx: entry.rx.clone(),
                },
                None,
            );
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        flights.insert(key.to_string(), FlightEntry { id, rx: rx.clone() });

        let resolver = Resolver {
            key: key.to_string(),
            id,
            tx: Some(tx),
            registry: self.clone(),
        };
        (CompletionHandle { rx }, Some(resolver))
    }

    /// Number of keys with an outstanding execution.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Remove `key` only if it still belongs to flight `id`.
    fn remove(&self, key: &str, id: u64) {
        let mut flights = self.lock();
        if flights.get(key).is_some_and(|entry| entry.id == id) {
            flights.remove(key);
        }
    }
}

/// Read-only view of a flight's outcome.
///
/// Dropping a handle detaches that one caller; the job keeps running.
#[derive(Clone)]
pub struct CompletionHandle {
    rx: watch::Receiver<Slot>,
}

impl CompletionHandle {
    /// Wait until the flight resolves and return its outcome.
    pub async fn wait(mut self) -> Outcome {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(AppError::JobAbandoned))
    }

    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

/// Single-use producer side of a flight.
///
/// Resolving removes the registry entry first and then publishes, so a
/// caller that arrives afterwards starts over from the cache check instead
/// of picking up a finished flight. Dropping an unresolved `Resolver`
/// publishes [`AppError::JobAbandoned`].
pub struct Resolver {
    key: String,
    id: u64,
    tx: Option<watch::Sender<Slot>>,
    registry: SingleFlightRegistry,
}

impl Resolver {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn resolve(mut self, outcome: Outcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: Outcome) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        self.registry.remove(&self.key, self.id);
        tx.send_replace(Some(outcome));
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!(key = %self.key, "Flight dropped before completion");
            self.finish(Err(AppError::JobAbandoned));
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("resolved", &self.tx.is_none())
            .finish()
    }
}
