use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use gather_core::error::AppError;
use gather_core::job::JobKind;
use gather_core::traits::{Extractor, ExtractorTable};

/// Environment variable carrying the worker slot to the extractor program.
pub const PROFILE_ENV: &str = "GATHER_PROFILE";

/// Extractor that shells out to an external program.
///
/// The program is invoked as `<program> [args..] <kind> <url>`. Exit status 0
/// with a JSON document on stdout is a success; anything else fails the job
/// with the program's stderr.
///
/// When run from the worker pool the worker slot is exported as
/// `GATHER_PROFILE`, so a browser-driving program can keep one profile
/// directory per slot without two sessions ever sharing it.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
    kind: JobKind,
}

impl CommandExtractor {
    pub fn new(program: impl Into<PathBuf>, kind: JobKind) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            kind,
        }
    }

    /// Leading arguments passed before the kind and URL.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// One extractor per [`JobKind`], all running the same program.
    pub fn table(program: impl Into<PathBuf>, args: &[String]) -> ExtractorTable {
        let program = program.into();
        JobKind::ALL
            .into_iter()
            .fold(ExtractorTable::new(), |table, kind| {
                let extractor = Self::new(program.clone(), kind).with_args(args.iter().cloned());
                table.with(kind, Arc::new(extractor))
            })
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    fn run(&self, resource: &str, slot: Option<usize>) -> Result<serde_json::Value, AppError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(self.kind.as_str())
            .arg(resource)
            .stdin(Stdio::null());
        if let Some(slot) = slot {
            command.env(PROFILE_ENV, slot.to_string());
        }

        let output = command
            .output()
            .map_err(|e| {
                AppError::ExtractionFailure(format!(
                    "Failed to run {}: {e}",
                    self.program.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.program.display(), output.status)
            } else {
                stderr.to_string()
            };
            return Err(AppError::ExtractionFailure(message));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            AppError::ExtractionFailure(format!("Extractor output is not valid JSON: {e}"))
        })
    }
}

impl Extractor for CommandExtractor {
    fn execute(&self, resource: &str) -> Result<serde_json::Value, AppError> {
        self.run(resource, None)
    }

    fn execute_in_slot(
        &self,
        resource: &str,
        slot: usize,
    ) -> Result<serde_json::Value, AppError> {
        self.run(resource, Some(slot))
    }
}
