// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! - [`JobwaveError`] is what library entry points return.
//! - [`WorkerError`] is what a transport reports from `validate`/`prepare`/`start`.
//! - [`JobError`] is the per-job failure detail stored on a terminal job and
//!   written into the batch report. It never propagates out of the scheduler.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobwaveError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised by a worker transport.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Invalid worker or job configuration for this transport.
    #[error("configuration error on worker '{worker}': {reason}")]
    Configuration { worker: String, reason: String },

    /// Transport target unreachable or a required remote service is down.
    #[error("worker '{worker}' is unreachable: {reason}")]
    Connection { worker: String, reason: String },

    /// The command could not be started.
    #[error("failed to launch job '{job}': {reason}")]
    Launch { job: String, reason: String },

    /// A termination request did not complete within its grace period.
    #[error("termination of job '{job}' did not complete: {reason}")]
    Termination { job: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn configuration(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        WorkerError::Configuration {
            worker: worker.into(),
            reason: reason.into(),
        }
    }

    pub fn connection(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        WorkerError::Connection {
            worker: worker.into(),
            reason: reason.into(),
        }
    }

    pub fn launch(job: impl Into<String>, reason: impl Into<String>) -> Self {
        WorkerError::Launch {
            job: job.into(),
            reason: reason.into(),
        }
    }
}

/// Failure detail attached to a job that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum JobError {
    #[error("launch failed: {0}")]
    Launch(String),

    #[error("process exited with code {code:?}")]
    Exit { code: Option<i32> },

    #[error("failure marker matched: {0}")]
    FailureMarker(String),

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("monitoring failed: {0}")]
    Monitor(String),

    #[error("log file never appeared: {0}")]
    NoLog(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("termination incomplete: {0}")]
    Termination(String),

    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    pub fn timeout(after: Duration) -> Self {
        JobError::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }
}

impl From<WorkerError> for JobError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Termination { reason, .. } => JobError::Termination(reason),
            other => JobError::Launch(other.to_string()),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobwaveError>;
