//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit and integration tests.
//! All mocks use `Arc<Mutex<_>>` or atomics for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::flight::SingleFlightRegistry;
use crate::job::{Job, JobKind};
use crate::traits::{CacheStore, Extractor};
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Holds extractions inside the worker until the test opens it.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
    entered: AtomicUsize,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Let every current and future waiter through.
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    /// Number of extractions that reached the gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Poll until at least `n` extractions are parked at the gate.
    pub async fn wait_entered(&self, n: usize) {
        while self.entered() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor that returns configurable JSON and counts invocations.
#[derive(Clone)]
pub struct MockExtractor {
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns a payload echoing the resource.
    responses: Arc<Mutex<Vec<Result<serde_json::Value, AppError>>>>,
    /// Fixed answers per resource, checked before `responses`.
    by_resource: Arc<Mutex<HashMap<String, Result<serde_json::Value, AppError>>>>,
    calls: Arc<AtomicUsize>,
    slots: Arc<Mutex<Vec<usize>>>,
    gate: Option<Arc<Gate>>,
}

impl MockExtractor {
    pub fn new(data: serde_json::Value) -> Self {
        Self::with_responses(vec![Ok(data)])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<serde_json::Value, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            by_resource: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            slots: Arc::new(Mutex::new(Vec::new())),
            gate: None,
        }
    }

    /// Echo the resource back, blocking at `gate` first.
    pub fn gated(gate: Arc<Gate>) -> Self {
        Self::with_responses(Vec::new()).with_gate(gate)
    }

    /// Block every call at `gate` before answering.
    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Always answer `result` for `resource`, whatever order calls arrive in.
    pub fn with_response_for(
        self,
        resource: &str,
        result: Result<serde_json::Value, AppError>,
    ) -> Self {
        self.by_resource
            .lock()
            .unwrap()
            .insert(resource.to_string(), result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Worker slots the calls ran on, in call order.
    pub fn slots(&self) -> Vec<usize> {
        self.slots.lock().unwrap().clone()
    }
}

impl Extractor for MockExtractor {
    fn execute(&self, resource: &str) -> Result<serde_json::Value, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass();
        }

        if let Some(fixed) = self.by_resource.lock().unwrap().get(resource) {
            return fixed.clone();
        }

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(serde_json::json!({ "resource": resource }))
        } else {
            responses.remove(0)
        }
    }

    fn execute_in_slot(
        &self,
        resource: &str,
        slot: usize,
    ) -> Result<serde_json::Value, AppError> {
        self.slots.lock().unwrap().push(slot);
        self.execute(resource)
    }
}

// ---------------------------------------------------------------------------
// FailingCache
// ---------------------------------------------------------------------------

/// Cache store whose backend is always unreachable.
#[derive(Clone, Default)]
pub struct FailingCache {
    attempts: Arc<AtomicUsize>,
}

impl FailingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl CacheStore for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, AppError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AppError::CacheUnavailable("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), AppError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AppError::CacheUnavailable("connection refused".into()))
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock worker reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match &event {
            WorkerEvent::Started { .. } => "Started",
            WorkerEvent::JobTaken { .. } => "JobTaken",
            WorkerEvent::JobCompleted { .. } => "JobCompleted",
            WorkerEvent::JobFailed { .. } => "JobFailed",
            WorkerEvent::JobServedFromCache { .. } => "JobServedFromCache",
            WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Register a fresh flight for `key` and wrap it in a `google` job.
///
/// Panics if `key` is already in flight.
pub fn make_test_job(registry: &SingleFlightRegistry, key: &str) -> Job {
    let (_, resolver) = registry.join_or_create(key);
    let resolver = resolver.expect("key already in flight");
    Job::new(
        JobKind::Google,
        "https://example.com".to_string(),
        key.to_string(),
        resolver,
    )
}
