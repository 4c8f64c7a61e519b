// src/report/store.rs

//! On-disk state of a batch.
//!
//! ```text
//! <state_dir>/<batch_id>/
//!   status.json        rewritten whenever a job settles
//!   report.json        written once after aggregation
//!   cancel/<job_id>    pending cancel requests
//!   events/<job>.log   per-job event logs (job-log observer)
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{JobwaveError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::job::Job;

use super::aggregate::{BatchReport, JobReport, StateCounts};

pub const STATUS_FILE: &str = "status.json";
pub const REPORT_FILE: &str = "report.json";
pub const CANCEL_DIR: &str = "cancel";
pub const EVENTS_DIR: &str = "events";

/// In-flight view of a batch (`status.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub batch_id: String,
    pub updated_at: DateTime<Utc>,
    pub counts: StateCounts,
    pub jobs: Vec<JobReport>,
}

impl StatusSnapshot {
    pub fn capture(batch_id: &str, jobs: &[Job]) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            updated_at: Utc::now(),
            counts: StateCounts::from_jobs(jobs),
            jobs: jobs.iter().map(JobReport::from_job).collect(),
        }
    }

    pub fn job(&self, id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

/// What `status` finds for a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredStatus {
    /// The batch finished and was aggregated.
    Final(BatchReport),
    /// The batch is running (or was interrupted before its report).
    InFlight(StatusSnapshot),
}

/// Paths and reads/writes under one batch's state directory.
#[derive(Debug, Clone)]
pub struct BatchStore {
    dir: PathBuf,
    batch_id: String,
}

impl BatchStore {
    pub fn new(state_dir: impl AsRef<Path>, batch_id: impl Into<String>) -> Self {
        let batch_id = batch_id.into();
        Self {
            dir: state_dir.as_ref().join(&batch_id),
            batch_id,
        }
    }

    /// A store for a batch that must already exist on disk.
    pub fn open(state_dir: impl AsRef<Path>, batch_id: impl Into<String>) -> Result<Self> {
        let store = Self::new(state_dir, batch_id);
        if !store.dir.is_dir() {
            return Err(JobwaveError::BatchNotFound(format!(
                "{} (no state under {:?})",
                store.batch_id, store.dir
            )));
        }
        Ok(store)
    }

    /// Create the batch directory and its subdirectories.
    ///
    /// A batch id may be reused across runs: the report and snapshot of an
    /// earlier run are removed so `status` and `cancel` see the new run.
    /// Pending cancel requests are kept.
    pub fn create(&self) -> Result<()> {
        for dir in [self.cancel_dir(), self.events_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating state dir {:?}", dir))?;
        }
        for stale in [self.report_path(), self.status_path()] {
            match std::fs::remove_file(&stale) {
                Ok(()) => info!(path = ?stale, "cleared state of a previous run"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("removing {:?}", stale))
                        .into());
                }
            }
        }
        debug!(dir = ?self.dir, "batch state directory ready");
        Ok(())
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cancel_dir(&self) -> PathBuf {
        self.dir.join(CANCEL_DIR)
    }

    pub fn events_dir(&self) -> PathBuf {
        self.dir.join(EVENTS_DIR)
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(REPORT_FILE)
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    pub fn write_report(&self, report: &BatchReport) -> Result<PathBuf> {
        let path = self.report_path();
        let json = serde_json::to_vec_pretty(report)?;
        RealFileSystem.write(&path, &json)?;
        info!(path = ?path, "batch report written");
        Ok(path)
    }

    pub fn write_snapshot(&self, snapshot: &StatusSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        RealFileSystem.write(&self.status_path(), &json)?;
        Ok(())
    }

    /// The final report if there is one, else the latest snapshot.
    pub fn read_status(&self) -> Result<StoredStatus> {
        let fs = RealFileSystem;
        let report = self.report_path();
        if fs.is_file(&report) {
            let text = fs.read_to_string(&report)?;
            return Ok(StoredStatus::Final(serde_json::from_str(&text)?));
        }
        let status = self.status_path();
        if fs.is_file(&status) {
            let text = fs.read_to_string(&status)?;
            return Ok(StoredStatus::InFlight(serde_json::from_str(&text)?));
        }
        Err(JobwaveError::BatchNotFound(format!(
            "{} (no report or status yet)",
            self.batch_id
        )))
    }

    /// File a cancel request for `job` with the running batch.
    pub fn request_cancel(&self, job: &str) -> Result<PathBuf> {
        if job.is_empty()
            || job.starts_with('.')
            || job.contains(['/', '\\'])
        {
            return Err(JobwaveError::ConfigError(format!(
                "'{job}' cannot be used as a cancel request name"
            )));
        }
        let dir = self.cancel_dir();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;
        let path = dir.join(job);
        std::fs::write(&path, Utc::now().to_rfc3339())
            .with_context(|| format!("writing cancel request {:?}", path))?;
        info!(job = %job, path = ?path, "cancel request filed");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchSettings, JobConfig};

    fn jobs() -> Vec<Job> {
        ["a", "b"]
            .iter()
            .map(|id| {
                let cfg = JobConfig::new(*id, "run", "/w", "/w/log");
                Job::from_config(&cfg, &BatchSettings::default()).unwrap()
            })
            .collect()
    }

    #[test]
    fn snapshot_then_report_take_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BatchStore::new(tmp.path(), "b1");
        store.create().unwrap();

        assert!(matches!(
            store.read_status(),
            Err(JobwaveError::BatchNotFound(_))
        ));

        store
            .write_snapshot(&StatusSnapshot::capture("b1", &jobs()))
            .unwrap();
        match store.read_status().unwrap() {
            StoredStatus::InFlight(s) => {
                assert_eq!(s.counts.pending, 2);
                assert!(s.job("a").is_some());
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        let report = BatchReport {
            batch_id: "b1".into(),
            generated_at: Utc::now(),
            counts: StateCounts::default(),
            verification_failures: 0,
            jobs: Vec::new(),
            excluded_workers: Vec::new(),
        };
        store.write_report(&report).unwrap();
        assert_eq!(store.read_status().unwrap(), StoredStatus::Final(report));
    }

    #[test]
    fn create_clears_results_of_a_previous_run() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BatchStore::new(tmp.path(), "nightly");
        store.create().unwrap();
        store
            .write_snapshot(&StatusSnapshot::capture("nightly", &jobs()))
            .unwrap();
        std::fs::write(store.report_path(), "{}").unwrap();
        store.request_cancel("a").unwrap();

        store.create().unwrap();
        assert!(!store.report_path().exists());
        assert!(!store.status_path().exists());
        assert!(store.cancel_dir().join("a").is_file());
    }

    #[test]
    fn open_requires_existing_batch() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(BatchStore::open(tmp.path(), "missing").is_err());
        BatchStore::new(tmp.path(), "there").create().unwrap();
        assert!(BatchStore::open(tmp.path(), "there").is_ok());
    }

    #[test]
    fn cancel_requests_reject_path_like_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BatchStore::new(tmp.path(), "b");
        assert!(store.request_cancel("../escape").is_err());
        assert!(store.request_cancel("").is_err());
        let path = store.request_cancel("case-1").unwrap();
        assert_eq!(path, store.cancel_dir().join("case-1"));
        assert!(path.is_file());
    }
}
