// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::{JobError, JobwaveError, Result};
use crate::exec::ExecutorBackend;
use crate::job::Job;
use crate::report::{BatchStore, StatusSnapshot};

use super::core::CoreScheduler;
use super::{CoreCommand, CoreStep, JobOutcome, RuntimeEvent};

/// Drives the wave coordinator in response to `RuntimeEvent`s, and delegates
/// job execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreScheduler`, which contains all the
/// scheduling semantics. This struct handles async IO: reading events from
/// the channel, arming timers, launching and stopping jobs, and writing
/// status snapshots.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreScheduler,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// Sender side of `event_rx`, used by timers. Weak, so the channel
    /// closes once every producer outside the runtime is gone.
    event_tx: mpsc::WeakSender<RuntimeEvent>,
    executor: E,
    snapshots: Option<BatchStore>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("snapshots", &self.snapshots)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreScheduler,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        event_tx: mpsc::Sender<RuntimeEvent>,
        executor: E,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx: event_tx.downgrade(),
            executor,
            snapshots: None,
        }
    }

    /// Rewrite the batch's `status.json` whenever a job settles.
    pub fn with_snapshots(mut self, store: BatchStore) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Submit `jobs` and run until every one of them is terminal.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core scheduler.
    /// - Executes commands returned by the core (launch, stop, timers).
    ///
    /// Returns the jobs in submission order.
    pub async fn run(mut self, jobs: Vec<Job>) -> Result<Vec<Job>> {
        info!(jobs = jobs.len(), "jobwave runtime started");

        let step = self.core.submit(jobs);
        let mut keep_running = self.apply(step).await;

        while keep_running {
            let Some(event) = self.event_rx.recv().await else {
                let unfinished = self.core.jobs().iter().filter(|j| !j.is_terminal()).count();
                error!(unfinished, "runtime event channel closed before the batch completed");
                return Err(JobwaveError::Other(anyhow::anyhow!(
                    "runtime event channel closed with {unfinished} unfinished jobs"
                )));
            };

            debug!(?event, "runtime received event");
            let step = self.core.step(event);
            keep_running = self.apply(step).await;
        }

        info!("batch complete; runtime exiting");
        Ok(self.core.into_jobs())
    }

    /// Execute a step's commands, including follow-up steps produced when
    /// the backend refuses a command.
    async fn apply(&mut self, step: CoreStep) -> bool {
        let mut keep_running = step.keep_running;
        let mut queue: VecDeque<CoreCommand> = step.commands.into();

        while let Some(command) = queue.pop_front() {
            if let Some(follow_up) = self.execute_command(command).await {
                keep_running = follow_up.keep_running;
                queue.extend(follow_up.commands);
            }
        }
        keep_running
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Option<CoreStep> {
        match command {
            CoreCommand::Launch { job, worker } => {
                let id = job.id.clone();
                debug!(job = %id, worker = %worker, "launching job");
                if let Err(e) = self.executor.launch(job, worker).await {
                    // The backend will never report on this job.
                    error!(job = %id, error = %e, "executor refused launch");
                    return Some(self.core.step(RuntimeEvent::JobFinished {
                        job: id,
                        outcome: JobOutcome::Failed {
                            error: JobError::Launch(e.to_string()),
                            exit_code: None,
                        },
                    }));
                }
            }
            CoreCommand::Stop { job, reason } => {
                if let Err(e) = self.executor.stop(job.clone(), reason).await {
                    warn!(job = %job, error = %e, "could not deliver stop request; backstop will reclaim the slot");
                }
            }
            CoreCommand::ArmTimer { job, after, kind } => {
                let Some(tx) = self.event_tx.upgrade() else {
                    warn!(job = %job, "no event producers left; timer not armed");
                    return None;
                };
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    // The runtime may be gone already; nothing to do then.
                    let _ = tx.send(RuntimeEvent::TimerFired { job, kind }).await;
                });
            }
            CoreCommand::JobSettled { job } => {
                debug!(job = %job, "job settled");
                self.write_snapshot();
            }
            CoreCommand::BatchComplete => {
                info!("core reported batch complete");
            }
        }
        None
    }

    fn write_snapshot(&self) {
        let Some(store) = &self.snapshots else {
            return;
        };
        let snapshot = StatusSnapshot::capture(store.batch_id(), self.core.jobs());
        if let Err(e) = store.write_snapshot(&snapshot) {
            warn!(batch = %store.batch_id(), error = %e, "failed to write status snapshot");
        }
    }
}
