// src/report/aggregate.rs

//! Post-batch verification and the batch report.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::JobError;
use crate::events::{EventEmitter, ExecutionEvent};
use crate::fs::FileSystem;
use crate::job::verify::HookRegistry;
use crate::job::{Job, JobStatus};
use crate::types::{JobId, WorkerId};
use crate::worker::ExcludedWorker;

/// Number of jobs per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub preparing: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
}

impl StateCounts {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            counts.record(job.status());
        }
        counts
    }

    pub fn record(&mut self, status: JobStatus) {
        let slot = match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Preparing => &mut self.preparing,
            JobStatus::Running => &mut self.running,
            JobStatus::Succeeded => &mut self.succeeded,
            JobStatus::Failed => &mut self.failed,
            JobStatus::TimedOut => &mut self.timed_out,
            JobStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.pending + self.preparing + self.running + self.terminal()
    }

    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed + self.timed_out + self.cancelled
    }
}

/// Outcome of a job's verification hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub hook: String,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One job's line in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub worker: Option<WorkerId>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    /// blake3 digest of the output artifact, when it exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_digest: Option<String>,
}

impl JobReport {
    /// The job's state as recorded by the scheduler, without verification.
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status(),
            worker: job.worker.clone(),
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            ended_at: job.ended_at,
            duration_ms: job.duration().map(|d| d.as_millis() as u64),
            exit_code: job.exit_code,
            error: job.error.clone(),
            verification: None,
            output_digest: None,
        }
    }
}

/// Machine-readable summary of a finished batch (`report.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub generated_at: DateTime<Utc>,
    pub counts: StateCounts,
    /// Jobs whose verification hook rejected their output.
    pub verification_failures: usize,
    pub jobs: Vec<JobReport>,
    #[serde(default)]
    pub excluded_workers: Vec<ExcludedWorker>,
}

impl BatchReport {
    /// Every job succeeded and no verification was rejected.
    pub fn fully_successful(&self) -> bool {
        self.counts.succeeded == self.jobs.len() && self.verification_failures == 0
    }

    pub fn job(&self, id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Jobs assigned to `worker`.
    pub fn assigned_to(&self, worker: &str) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.worker.as_deref() == Some(worker))
            .count()
    }
}

/// Verify every succeeded job and compile the batch report.
///
/// Verification is recorded next to the job's state and never changes it.
/// Jobs that did not succeed are not verified. A `VerifyResult` event is
/// emitted for each verified job.
pub fn aggregate(
    batch_id: &str,
    jobs: &[Job],
    hooks: &HookRegistry,
    fs: &dyn FileSystem,
    emitter: &EventEmitter,
    excluded: &[ExcludedWorker],
) -> BatchReport {
    let mut reports = Vec::with_capacity(jobs.len());
    let mut verification_failures = 0;

    for job in jobs {
        let mut report = JobReport::from_job(job);

        if job.status() == JobStatus::Succeeded {
            if let Some(hook) = &job.verify {
                let verification = verify_job(job, hook, hooks, fs);
                if !verification.verified {
                    verification_failures += 1;
                    warn!(job = %job.id, hook = %hook, detail = ?verification.detail, "verification failed");
                }
                emitter.emit(ExecutionEvent::VerifyResult {
                    job: job.id.clone(),
                    verified: verification.verified,
                    detail: verification.detail.clone(),
                });
                report.verification = Some(verification);
            }
        }

        report.output_digest = job.output.as_deref().and_then(|p| output_digest(fs, p));
        reports.push(report);
    }

    let counts = StateCounts::from_jobs(jobs);
    info!(
        batch = %batch_id,
        succeeded = counts.succeeded,
        failed = counts.failed,
        timed_out = counts.timed_out,
        cancelled = counts.cancelled,
        verification_failures,
        "batch report compiled"
    );

    BatchReport {
        batch_id: batch_id.to_string(),
        generated_at: Utc::now(),
        counts,
        verification_failures,
        jobs: reports,
        excluded_workers: excluded.to_vec(),
    }
}

fn verify_job(job: &Job, hook_id: &str, hooks: &HookRegistry, fs: &dyn FileSystem) -> Verification {
    let result = match hooks.resolve(hook_id) {
        Some(hook) => catch_unwind(AssertUnwindSafe(|| hook.verify(job, fs)))
            .unwrap_or_else(|_| Err("verification hook panicked".to_string())),
        None => Err(format!("unknown verification hook '{hook_id}'")),
    };
    let (verified, detail) = match result {
        Ok(()) => (true, None),
        Err(reason) => (false, Some(JobError::Verification(reason).to_string())),
    };
    Verification {
        hook: hook_id.to_string(),
        verified,
        detail,
    }
}

/// Hex blake3 digest of the file at `path`, if it is a readable file.
pub fn output_digest(fs: &dyn FileSystem, path: &Path) -> Option<String> {
    if !fs.is_file(path) {
        return None;
    }
    let mut reader = match fs.open_read(path) {
        Ok(r) => r,
        Err(e) => {
            warn!(path = ?path, error = %e, "cannot open output for digest");
            return None;
        }
    };
    let mut hasher = blake3::Hasher::new();
    if let Err(e) = hasher.update_reader(&mut reader) {
        warn!(path = ?path, error = %e, "cannot read output for digest");
        return None;
    }
    let digest = hasher.finalize().to_hex().to_string();
    debug!(path = ?path, %digest, "output digest");
    Some(digest)
}
