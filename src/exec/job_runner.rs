// src/exec/job_runner.rs

//! Execution of a single job on its worker.
//!
//! `run_job` drives one job through `prepare → start → monitor` and always
//! ends by reporting exactly one `RuntimeEvent::JobFinished`. Once
//! `PrepStarted` was emitted, exactly one `ExecCompleted` follows, whatever
//! went wrong in between.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::{JobOutcome, RuntimeEvent};
use crate::errors::JobError;
use crate::events::{EventEmitter, ExecutionEvent};
use crate::job::Job;
use crate::monitor::{ExecutionMonitor, Markers, MonitorOutcome, MonitorSettings};
use crate::types::StopReason;
use crate::worker::{ProcessProbe, RunningHandle, Worker};

/// Timing knobs shared by every job runner of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    pub monitor: MonitorSettings,
    /// Delay between the graceful and the forced kill, and bound on each.
    pub termination_grace: Duration,
}

/// Stop requests for one job.
///
/// A dropped sender means no stop will ever come, so waiting then never
/// resolves.
struct StopSignal {
    rx: Option<oneshot::Receiver<StopReason>>,
}

impl StopSignal {
    async fn requested(&mut self) -> StopReason {
        if let Some(rx) = self.rx.as_mut() {
            let received = rx.await;
            self.rx = None;
            if let Ok(reason) = received {
                return reason;
            }
        }
        std::future::pending().await
    }
}

/// Run `job` on `worker` and report its outcome to the runtime.
pub async fn run_job(
    job: Job,
    worker: Arc<dyn Worker>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    emitter: EventEmitter,
    stop_rx: oneshot::Receiver<StopReason>,
    settings: RunnerSettings,
) {
    let id = job.id.clone();
    let mut stop = StopSignal { rx: Some(stop_rx) };

    emitter.emit(ExecutionEvent::PrepStarted {
        job: id.clone(),
        worker: worker.id().to_string(),
    });

    let begun = Instant::now();
    let outcome = drive(&job, worker.as_ref(), &runtime_tx, &emitter, &mut stop, settings).await;

    emitter.emit(ExecutionEvent::ExecCompleted {
        job: id.clone(),
        success: matches!(outcome, JobOutcome::Succeeded { .. }),
        duration: begun.elapsed(),
    });

    info!(job = %id, worker = %worker.id(), ?outcome, "job runner finished");
    if runtime_tx
        .send(RuntimeEvent::JobFinished { job: id.clone(), outcome })
        .await
        .is_err()
    {
        warn!(job = %id, "runtime is gone; outcome dropped");
    }
}

async fn drive(
    job: &Job,
    worker: &dyn Worker,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    emitter: &EventEmitter,
    stop: &mut StopSignal,
    settings: RunnerSettings,
) -> JobOutcome {
    let id = job.id.as_str();

    let prepared = tokio::select! {
        prepared = worker.prepare(job) => prepared,
        reason = stop.requested() => {
            info!(job = %id, %reason, "stopped during preparation");
            return JobOutcome::Stopped { reason, error: None };
        }
    };
    let prepared = match prepared {
        Ok(p) => p,
        Err(e) => {
            warn!(job = %id, worker = %worker.id(), error = %e, "preparation failed");
            return failed(e.into(), None);
        }
    };
    emitter.emit(ExecutionEvent::PrepCompleted { job: id.to_string() });

    let markers = match Markers::compile(&job.markers) {
        Ok(m) => m,
        Err(e) => return failed(JobError::Monitor(format!("invalid marker: {e}")), None),
    };

    let command = prepared.command_line.clone();
    let log_path = prepared.log_path.clone();
    // Taken before launch so a stale log from an earlier run is ignored.
    let started = SystemTime::now();

    let mut handle = tokio::select! {
        handle = worker.start(prepared) => match handle {
            Ok(h) => h,
            Err(e) => {
                warn!(job = %id, worker = %worker.id(), error = %e, "launch failed");
                return failed(e.into(), None);
            }
        },
        reason = stop.requested() => {
            info!(job = %id, %reason, "stopped before launch");
            return JobOutcome::Stopped { reason, error: None };
        }
    };

    debug!(job = %id, pid = ?handle.pid(), %command, "process started");
    emitter.emit(ExecutionEvent::ExecStarted {
        job: id.to_string(),
        command,
    });
    if runtime_tx
        .send(RuntimeEvent::JobStarted { job: id.to_string() })
        .await
        .is_err()
    {
        warn!(job = %id, "runtime is gone; terminating orphaned process");
        let _ = handle.terminate(settings.termination_grace).await;
        return failed(JobError::Monitor("runtime shut down".to_string()), None);
    }

    let monitor = ExecutionMonitor::new(id, log_path, started, markers, settings.monitor);
    let watched = tokio::select! {
        report = monitor.run(&mut handle, emitter) => Ok(report),
        reason = stop.requested() => Err(reason),
    };

    match watched {
        Ok(report) => {
            reap(&mut handle, settings.termination_grace).await;
            match report.outcome {
                MonitorOutcome::Succeeded { exit_code } => JobOutcome::Succeeded { exit_code },
                MonitorOutcome::Failed(error) => failed(error, handle.exit_info().and_then(|e| e.code)),
            }
        }
        Err(reason) => stop_process(&mut handle, reason, settings.termination_grace).await,
    }
}

/// The monitor is done; make sure nothing of the job keeps running.
async fn reap(handle: &mut RunningHandle, grace: Duration) {
    match handle.poll_exit() {
        Ok(Some(_)) => {}
        Ok(None) | Err(_) => {
            debug!(job = %handle.job_id(), "process outlived its monitor; terminating");
            if let Err(e) = handle.terminate(grace).await {
                warn!(job = %handle.job_id(), error = %e, "could not terminate lingering process");
            }
        }
    }
}

async fn stop_process(handle: &mut RunningHandle, reason: StopReason, grace: Duration) -> JobOutcome {
    // The process may have ended on its own just before the request arrived.
    if let Ok(Some(exit)) = handle.poll_exit() {
        info!(job = %handle.job_id(), %reason, ?exit, "process already exited; keeping its outcome");
        return if exit.success {
            JobOutcome::Succeeded { exit_code: exit.code }
        } else {
            failed(JobError::Exit { code: exit.code }, exit.code)
        };
    }

    info!(job = %handle.job_id(), %reason, "terminating process");
    match handle.terminate(grace).await {
        Ok(exit) => {
            debug!(job = %handle.job_id(), ?exit, "process terminated");
            JobOutcome::Stopped { reason, error: None }
        }
        Err(e) => {
            warn!(job = %handle.job_id(), error = %e, "termination did not complete");
            JobOutcome::Stopped {
                reason,
                error: Some(e.into()),
            }
        }
    }
}

fn failed(error: JobError, exit_code: Option<i32>) -> JobOutcome {
    JobOutcome::Failed { error, exit_code }
}
