use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::flight::Resolver;

/// Supported extraction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "yandex")]
    Yandex,
    #[serde(rename = "2gis")]
    Gis,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "doctors")]
    Doctors,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Yandex,
        JobKind::Gis,
        JobKind::Google,
        JobKind::Doctors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Yandex => "yandex",
            JobKind::Gis => "2gis",
            JobKind::Google => "google",
            JobKind::Doctors => "doctors",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yandex" => Ok(JobKind::Yandex),
            "2gis" | "gis" => Ok(JobKind::Gis),
            "google" => Ok(JobKind::Google),
            "doctors" => Ok(JobKind::Doctors),
            _ => Err(AppError::UnsupportedKind(s.to_string())),
        }
    }
}

/// A unit of work sitting in the admission queue.
///
/// Owns the creator's [`Resolver`]: whichever worker takes the job is the
/// single producer for every caller joined on `key`.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub resource: String,
    pub key: String,
    pub enqueued_at: DateTime<Utc>,
    pub(crate) completion: Resolver,
}

impl Job {
    pub(crate) fn new(kind: JobKind, resource: String, key: String, completion: Resolver) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            resource,
            key,
            enqueued_at: Utc::now(),
            completion,
        }
    }

    /// Time spent between admission and now.
    pub fn queue_wait(&self) -> TimeDelta {
        Utc::now() - self.enqueued_at
    }
}

/// Outcome shape handed to callers: `{success, data, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: &AppError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

impl From<Result<serde_json::Value, AppError>> for Envelope {
    fn from(result: Result<serde_json::Value, AppError>) -> Self {
        match result {
            Ok(data) => Envelope::ok(data),
            Err(e) => Envelope::err(&e),
        }
    }
}
