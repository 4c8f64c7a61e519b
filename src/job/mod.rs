// src/job/mod.rs

//! Job descriptors and their lifecycle.
//!
//! - [`state`] holds the `JobStatus` state machine.
//! - [`template`] renders command templates with worker-visible paths.
//! - [`verify`] holds post-hoc verification hooks.

pub mod state;
pub mod template;
pub mod verify;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{parse_duration, BatchSettings, JobConfig};
use crate::errors::{JobError, JobwaveError, Result};
use crate::types::{JobId, LogSource, WorkerId};

pub use state::{InvalidTransition, JobStatus};
pub use template::{shell_quote, TemplateVars};

/// What to run: a command template plus where and with which environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub template: String,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

/// Completion markers (regex source strings) for the monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerSpec {
    pub completion: Option<String>,
    pub failure: Option<String>,
}

/// A unit of work owned by the scheduler until it reaches a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub command: CommandSpec,
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub log_path: PathBuf,
    pub log_source: LogSource,
    pub timeout: Option<Duration>,
    pub verify: Option<String>,
    pub markers: MarkerSpec,

    status: JobStatus,
    /// Worker the job was dispatched to, if any.
    pub worker: Option<WorkerId>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<JobError>,
}

impl Job {
    /// Build a pending job from its configuration, applying batch-level
    /// marker defaults.
    pub fn from_config(cfg: &JobConfig, settings: &BatchSettings) -> Result<Self> {
        let timeout = match cfg.timeout {
            Some(ref t) => Some(parse_duration(t).map_err(|e| {
                JobwaveError::ConfigError(format!("job '{}': timeout: {e}", cfg.id))
            })?),
            None => None,
        };

        Ok(Self {
            id: cfg.id.clone(),
            command: CommandSpec {
                template: cfg.cmd.clone(),
                working_dir: cfg.working_dir.clone(),
                env: cfg.env.clone(),
            },
            inputs: cfg.inputs.clone(),
            output: cfg.output.clone(),
            log_path: cfg.log.clone(),
            log_source: cfg.log_source,
            timeout,
            verify: cfg.verify.clone(),
            markers: MarkerSpec {
                completion: cfg
                    .completion_marker
                    .clone()
                    .or_else(|| settings.completion_marker.clone()),
                failure: cfg
                    .failure_marker
                    .clone()
                    .or_else(|| settings.failure_marker.clone()),
            },
            status: JobStatus::Pending,
            worker: None,
            submitted_at: Utc::now(),
            started_at: None,
            ended_at: None,
            exit_code: None,
            error: None,
        })
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, stamping start/end times.
    pub fn transition(&mut self, next: JobStatus) -> std::result::Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        let now = Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    /// Wall-clock time spent running, if the job ever started.
    pub fn duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let ended = self.ended_at.unwrap_or_else(Utc::now);
        (ended - started).to_std().ok()
    }

    /// Variables for rendering the command template, with paths as the
    /// orchestrator sees them. Workers that translate paths override these.
    pub fn local_template_vars(&self) -> TemplateVars {
        let display = |p: &PathBuf| p.to_string_lossy().into_owned();
        TemplateVars {
            job: self.id.clone(),
            workdir: display(&self.command.working_dir),
            log: display(&self.log_path),
            output: self.output.as_ref().map(display),
            inputs: self.inputs.iter().map(display).collect(),
        }
    }
}
