//! Admission-controlled dispatch for slow, blocking page extractions.
//!
//! A [`Dispatcher`] bounds concurrent extractions to a fixed worker pool,
//! collapses concurrent requests for the same resource into one execution
//! and caches successful results with a TTL.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod flight;
pub mod job;
pub mod key;
pub mod queue;
pub mod testutil;
pub mod traits;
pub mod worker;

pub use cache::{MemoryCache, ResultCache};
pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, HealthSnapshot};
pub use error::AppError;
pub use job::{Envelope, JobKind};
pub use key::derive_key;
pub use traits::{CacheStore, Extractor, ExtractorTable, NullCache};
