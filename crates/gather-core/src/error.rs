use thiserror::Error;

/// Application-wide error types for gather.
///
/// Cloneable so a single job outcome can be fanned out to every caller
/// waiting on the same key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Admission rejected: the bounded queue was at capacity.
    #[error("queue_full: admission queue is at capacity ({capacity})")]
    QueueFull { capacity: usize },

    /// The external extraction capability failed (timeout, missing element,
    /// navigation failure, non-zero exit).
    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// Cache backend could not be reached or answered with an error.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// No extractor is registered for the requested job kind.
    #[error("Unsupported job kind: {0}")]
    UnsupportedKind(String),

    /// The job was dropped before a worker resolved it (shutdown or panic).
    #[error("Job abandoned before completion")]
    JobAbandoned,

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AppError {
    /// Returns true if the caller was turned away by admission control.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, AppError::QueueFull { .. })
    }

    /// Returns true for conditions that only degrade service and must never
    /// reach a submitter.
    pub fn is_soft(&self) -> bool {
        matches!(self, AppError::CacheUnavailable(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}
