// src/engine/event_handlers.rs

//! Event handling logic for the scheduler core.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::core::CoreScheduler;
use crate::engine::{JobOutcome, TimerKind};
use crate::errors::JobError;
use crate::job::{Job, JobStatus};
use crate::types::{JobId, StopReason, WorkerId};

/// Command produced by the pure core, to be executed by the IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    /// Prepare and start `job` on `worker`. The slot is already held.
    Launch { job: Job, worker: WorkerId },
    /// Ask the runner of `job` to terminate its process.
    Stop { job: JobId, reason: StopReason },
    /// Deliver `RuntimeEvent::TimerFired` for `job` after `after`.
    ArmTimer {
        job: JobId,
        after: Duration,
        kind: TimerKind,
    },
    /// `job` reached a terminal state.
    JobSettled { job: JobId },
    /// Every job is terminal.
    BatchComplete,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreScheduler {
    /// `Preparing → Running`; arms the job's timeout if it has one.
    pub(super) fn handle_started(&mut self, id: &str) -> Vec<CoreCommand> {
        if !self.active.contains_key(id) {
            debug!(job = %id, "start reported for a job without a slot; ignored");
            return Vec::new();
        }
        let Some(job) = self.job_mut(id) else {
            return Vec::new();
        };
        if let Err(e) = job.transition(JobStatus::Running) {
            warn!(job = %id, error = %e, "ignoring start report");
            return Vec::new();
        }
        match job.timeout {
            Some(after) => vec![CoreCommand::ArmTimer {
                job: id.to_string(),
                after,
                kind: TimerKind::Timeout,
            }],
            None => Vec::new(),
        }
    }

    /// A runner reported its terminal outcome.
    ///
    /// A natural outcome (success or failure) wins over a stop that was
    /// requested but not yet carried out. Reports for jobs already settled by
    /// the termination backstop are ignored.
    pub(super) fn handle_finished(&mut self, id: &str, outcome: JobOutcome) -> Vec<CoreCommand> {
        if !self.active.contains_key(id) {
            info!(job = %id, ?outcome, "late report for an already settled job; ignored");
            return Vec::new();
        }
        match outcome {
            JobOutcome::Succeeded { exit_code } => {
                self.settle_active(id, JobStatus::Succeeded, None, exit_code)
            }
            JobOutcome::Failed { error, exit_code } => {
                self.settle_active(id, JobStatus::Failed, Some(error), exit_code)
            }
            JobOutcome::Stopped { reason, error } => {
                let error = error.or_else(|| Some(self.stop_error(id, reason)));
                self.settle_active(id, stop_status(reason), error, None)
            }
        }
    }

    /// Cancel one job: synchronously when pending, through the runner when
    /// it holds a slot.
    pub(super) fn handle_cancel(&mut self, id: &str) -> Vec<CoreCommand> {
        if self.queue.remove(id) {
            if let Some(job) = self.job_mut(id) {
                if job.transition(JobStatus::Cancelled).is_ok() {
                    job.error = Some(JobError::Cancelled);
                    info!(job = %id, "pending job cancelled");
                }
            }
            return vec![CoreCommand::JobSettled { job: id.to_string() }];
        }
        if self.active.contains_key(id) {
            return self.request_stop(id, StopReason::Cancelled);
        }
        match self.job(id) {
            Some(job) => debug!(job = %id, status = %job.status(), "cancel for finished job ignored"),
            None => warn!(job = %id, "cancel requested for unknown job"),
        }
        Vec::new()
    }

    pub(super) fn handle_cancel_all(&mut self) -> Vec<CoreCommand> {
        info!(
            pending = self.queue.len(),
            active = self.active.len(),
            "cancelling every unfinished job"
        );
        let mut commands = Vec::new();
        for id in self.queue.drain() {
            if let Some(job) = self.job_mut(&id) {
                if job.transition(JobStatus::Cancelled).is_ok() {
                    job.error = Some(JobError::Cancelled);
                }
            }
            commands.push(CoreCommand::JobSettled { job: id });
        }
        let mut active: Vec<JobId> = self.active.keys().cloned().collect();
        active.sort();
        for id in active {
            commands.extend(self.request_stop(&id, StopReason::Cancelled));
        }
        commands
    }

    pub(super) fn handle_timer(&mut self, id: &str, kind: TimerKind) -> Vec<CoreCommand> {
        let running = self.job(id).is_some_and(|j| j.status() == JobStatus::Running);
        match kind {
            TimerKind::Timeout if running => {
                info!(job = %id, "job exceeded its timeout");
                self.request_stop(id, StopReason::TimedOut)
            }
            TimerKind::Timeout => Vec::new(),
            TimerKind::TerminationBackstop => self.handle_backstop(id),
        }
    }

    /// The runner never confirmed termination: reclaim the slot anyway.
    fn handle_backstop(&mut self, id: &str) -> Vec<CoreCommand> {
        let Some(reason) = self.active.get(id).and_then(|a| a.stop) else {
            return Vec::new();
        };
        let grace = self.backstop_after();
        warn!(
            job = %id,
            ?grace,
            "termination not confirmed; reclaiming slot, process may still be running"
        );
        let error = JobError::Termination(format!("not confirmed within {grace:?}"));
        self.settle_active(id, stop_status(reason), Some(error), None)
    }

    fn request_stop(&mut self, id: &str, reason: StopReason) -> Vec<CoreCommand> {
        let backstop = self.backstop_after();
        let Some(active) = self.active.get_mut(id) else {
            return Vec::new();
        };
        if let Some(existing) = active.stop {
            debug!(job = %id, %existing, "stop already requested");
            return Vec::new();
        }
        active.stop = Some(reason);
        info!(job = %id, %reason, "requesting stop");
        vec![
            CoreCommand::Stop {
                job: id.to_string(),
                reason,
            },
            CoreCommand::ArmTimer {
                job: id.to_string(),
                after: backstop,
                kind: TimerKind::TerminationBackstop,
            },
        ]
    }

    fn stop_error(&self, id: &str, reason: StopReason) -> JobError {
        match reason {
            StopReason::Cancelled => JobError::Cancelled,
            StopReason::TimedOut => {
                let after = self.job(id).and_then(|j| j.timeout).unwrap_or_default();
                JobError::timeout(after)
            }
        }
    }
}

fn stop_status(reason: StopReason) -> JobStatus {
    match reason {
        StopReason::Cancelled => JobStatus::Cancelled,
        StopReason::TimedOut => JobStatus::TimedOut,
    }
}
