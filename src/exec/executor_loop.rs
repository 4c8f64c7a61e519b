// src/exec/executor_loop.rs

//! Main executor loop that manages running jobs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::engine::{JobOutcome, RuntimeEvent};
use crate::errors::JobError;
use crate::events::{EventEmitter, ExecutionEvent};
use crate::job::Job;
use crate::types::{JobId, StopReason};
use crate::worker::Worker;

use super::job_runner::{run_job, RunnerSettings};

/// Requests the backend forwards to the loop.
#[derive(Debug)]
pub enum ExecRequest {
    Launch { job: Job, worker: Arc<dyn Worker> },
    Stop { job: JobId, reason: StopReason },
}

/// Internal handle for a launched job.
///
/// - `stop` delivers a termination request to the job's runner.
/// - `handle` is the Tokio task supervising the runner.
struct ActiveJob {
    stop: Option<oneshot::Sender<StopReason>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// Each launched job runs in its own Tokio task. If a runner panics, a
/// failure is synthesized for it so the scheduler never waits forever.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    emitter: EventEmitter,
    settings: RunnerSettings,
) -> mpsc::Sender<ExecRequest> {
    let (tx, mut rx) = mpsc::channel::<ExecRequest>(64);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<JobId, ActiveJob> = HashMap::new();

        while let Some(request) = rx.recv().await {
            active.retain(|_, a| !a.handle.is_finished());
            match request {
                ExecRequest::Launch { job, worker } => {
                    let id = job.id.clone();
                    let entry = launch(job, worker, &runtime_tx, &emitter, settings);
                    active.insert(id, entry);
                }
                ExecRequest::Stop { job, reason } => stop(&job, reason, &mut active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn launch(
    job: Job,
    worker: Arc<dyn Worker>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    emitter: &EventEmitter,
    settings: RunnerSettings,
) -> ActiveJob {
    let (stop_tx, stop_rx) = oneshot::channel::<StopReason>();
    let rt_tx = runtime_tx.clone();
    let emitter = emitter.clone();
    let id = job.id.clone();

    let handle = tokio::spawn(async move {
        let runner = tokio::spawn(run_job(job, worker, rt_tx.clone(), emitter.clone(), stop_rx, settings));
        if let Err(e) = runner.await {
            error!(job = %id, error = %e, "job runner crashed; reporting failure");
            emitter.emit(ExecutionEvent::ExecCompleted {
                job: id.clone(),
                success: false,
                duration: std::time::Duration::ZERO,
            });
            let _ = rt_tx
                .send(RuntimeEvent::JobFinished {
                    job: id,
                    outcome: JobOutcome::Failed {
                        error: JobError::Monitor(format!("job runner crashed: {e}")),
                        exit_code: None,
                    },
                })
                .await;
        }
    });

    ActiveJob {
        stop: Some(stop_tx),
        handle,
    }
}

fn stop(job: &str, reason: StopReason, active: &mut HashMap<JobId, ActiveJob>) {
    let Some(entry) = active.get_mut(job) else {
        debug!(job = %job, "stop for a job that is not running; ignored");
        return;
    };
    match entry.stop.take() {
        Some(tx) => {
            info!(job = %job, %reason, "forwarding stop request");
            if tx.send(reason).is_err() {
                debug!(job = %job, "runner already finished while stopping");
            }
        }
        None => debug!(job = %job, "stop already forwarded"),
    }
}
