// src/engine/core.rs

//! Pure wave coordinator state machine.
//!
//! [`CoreScheduler`] consumes [`RuntimeEvent`]s and produces:
//! - updated job states
//! - a list of [`CoreCommand`]s describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from the channel
//! - launching and stopping jobs through the executor backend
//! - arming timers and writing status snapshots
//!
//! The core has no channels, no Tokio types and performs no IO, so the
//! capacity and liveness properties can be tested exhaustively.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::event_handlers::{CoreCommand, CoreStep};
use crate::engine::queue::PendingQueue;
use crate::engine::RuntimeEvent;
use crate::errors::JobError;
use crate::job::{Job, JobStatus};
use crate::types::{JobId, StopReason, WorkerId};
use crate::worker::Slots;

/// Bookkeeping for a job that holds a slot.
#[derive(Debug, Clone)]
pub(super) struct Active {
    pub(super) worker: usize,
    pub(super) stop: Option<StopReason>,
}

/// Pure scheduler state.
///
/// Owns:
/// - every job of the batch, in submission order
/// - the pending queue
/// - the slot counters of the pool's workers
#[derive(Debug)]
pub struct CoreScheduler {
    pub(super) jobs: Vec<Job>,
    pub(super) index: HashMap<JobId, usize>,
    pub(super) queue: PendingQueue,
    pub(super) workers: Vec<(WorkerId, Arc<Slots>)>,
    pub(super) active: HashMap<JobId, Active>,
    /// Next worker to offer a slot first, for round-robin spreading.
    pub(super) cursor: usize,
    pub(super) termination_grace: Duration,
}

impl CoreScheduler {
    pub fn new(workers: Vec<(WorkerId, Arc<Slots>)>, termination_grace: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            index: HashMap::new(),
            queue: PendingQueue::new(),
            workers,
            active: HashMap::new(),
            cursor: 0,
            termination_grace,
        }
    }

    /// Add pending jobs and fill free capacity.
    ///
    /// Jobs whose id is already known are rejected as failed duplicates
    /// rather than silently merged. With no workers at all every job fails
    /// immediately so the batch still completes.
    pub fn submit(&mut self, jobs: Vec<Job>) -> CoreStep {
        let mut commands = Vec::new();
        let mut seen: HashSet<JobId> = self.index.keys().cloned().collect();

        for mut job in jobs {
            if !seen.insert(job.id.clone()) {
                warn!(job = %job.id, "duplicate job id in submission; ignored");
                continue;
            }
            let id = job.id.clone();
            if self.workers.is_empty() {
                self.fail_unscheduled(&mut job, "no worker available");
                commands.push(CoreCommand::JobSettled { job: id.clone() });
            } else {
                self.queue.push(id.clone());
            }
            self.index.insert(id, self.jobs.len());
            self.jobs.push(job);
        }

        commands.extend(self.fill());
        self.finish_step(commands)
    }

    /// Handle a single runtime event, returning commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let commands = match event {
            RuntimeEvent::JobStarted { job } => self.handle_started(&job),
            RuntimeEvent::JobFinished { job, outcome } => self.handle_finished(&job, outcome),
            RuntimeEvent::CancelRequested { job } => self.handle_cancel(&job),
            RuntimeEvent::CancelAll => self.handle_cancel_all(),
            RuntimeEvent::TimerFired { job, kind } => self.handle_timer(&job, kind),
        };
        self.finish_step(commands)
    }

    pub fn is_complete(&self) -> bool {
        self.jobs.iter().all(Job::is_terminal)
    }

    /// All jobs in submission order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.index.get(id).map(|&i| &self.jobs[i])
    }

    pub fn into_jobs(self) -> Vec<Job> {
        self.jobs
    }

    /// Jobs currently holding a slot on `worker`.
    pub fn active_on(&self, worker: &str) -> usize {
        self.active
            .values()
            .filter(|a| self.workers[a.worker].0 == worker)
            .count()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(super) fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        let i = *self.index.get(id)?;
        Some(&mut self.jobs[i])
    }

    pub(super) fn backstop_after(&self) -> Duration {
        self.termination_grace * 2 + super::BACKSTOP_SLACK
    }

    /// Offer free slots to pending jobs, one slot per worker per round so
    /// work spreads across the pool. Capacity is never left idle while jobs
    /// are pending.
    pub(super) fn fill(&mut self) -> Vec<CoreCommand> {
        let mut commands = Vec::new();
        let n = self.workers.len();
        if n == 0 {
            return commands;
        }

        'rounds: loop {
            let mut progressed = false;
            for step in 0..n {
                if self.queue.is_empty() {
                    break 'rounds;
                }
                let w = (self.cursor + step) % n;
                if !self.workers[w].1.try_acquire() {
                    continue;
                }
                let Some(id) = self.queue.pop() else {
                    self.workers[w].1.release();
                    break 'rounds;
                };
                if let Some(command) = self.dispatch(id, w) {
                    progressed = true;
                    commands.push(command);
                }
            }
            if !progressed {
                break;
            }
        }
        self.cursor = (self.cursor + 1) % n;
        commands
    }

    fn dispatch(&mut self, id: JobId, w: usize) -> Option<CoreCommand> {
        let worker_id = self.workers[w].0.clone();
        let Some(&i) = self.index.get(&id) else {
            warn!(job = %id, "queued job unknown to scheduler; dropped");
            self.workers[w].1.release();
            return None;
        };
        let job = &mut self.jobs[i];
        if let Err(e) = job.transition(JobStatus::Preparing) {
            warn!(job = %id, error = %e, "unexpected state at dispatch");
        }
        job.worker = Some(worker_id.clone());
        let command = CoreCommand::Launch {
            job: job.clone(),
            worker: worker_id.clone(),
        };
        info!(job = %id, worker = %worker_id, "dispatching job");
        self.active.insert(id, Active { worker: w, stop: None });
        Some(command)
    }

    /// Settle a job that still holds a slot, releasing the slot.
    pub(super) fn settle_active(
        &mut self,
        id: &str,
        status: JobStatus,
        error: Option<JobError>,
        exit_code: Option<i32>,
    ) -> Vec<CoreCommand> {
        if let Some(active) = self.active.remove(id) {
            self.workers[active.worker].1.release();
        }
        if let Some(job) = self.job_mut(id) {
            let settled = match job.transition(status) {
                Ok(()) => status,
                Err(e) => {
                    // A slot holder must still end up terminal.
                    warn!(job = %id, error = %e, "invalid transition; settling as failed");
                    let _ = job.transition(JobStatus::Failed);
                    JobStatus::Failed
                }
            };
            job.error = error;
            job.exit_code = exit_code;
            info!(job = %id, status = %settled, "job settled");
        }
        let mut commands = vec![CoreCommand::JobSettled { job: id.to_string() }];
        commands.extend(self.fill());
        commands
    }

    fn fail_unscheduled(&self, job: &mut Job, reason: &str) {
        // Pending → Preparing → Failed keeps the state machine honest.
        let _ = job.transition(JobStatus::Preparing);
        let _ = job.transition(JobStatus::Failed);
        job.error = Some(JobError::Launch(reason.to_string()));
    }

    fn finish_step(&self, mut commands: Vec<CoreCommand>) -> CoreStep {
        let complete = self.is_complete();
        if complete {
            commands.push(CoreCommand::BatchComplete);
        }
        CoreStep {
            commands,
            keep_running: !complete,
        }
    }
}
