// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production executor in [`executor_loop`](super::executor_loop).
//!
//! - `WorkerExecutor` is the production implementation. It wraps the
//!   `spawn_executor` loop and resolves worker ids against the pool.
//! - Tests can provide their own `ExecutorBackend` that, for example,
//!   records launches and emits `JobFinished` events directly.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result, WorkerError};
use crate::events::EventEmitter;
use crate::job::Job;
use crate::types::{JobId, StopReason, WorkerId};
use crate::worker::{Worker, WorkerPool};

use super::executor_loop::{spawn_executor, ExecRequest};
use super::job_runner::RunnerSettings;

/// Trait abstracting how launched jobs are executed.
///
/// Production code uses [`WorkerExecutor`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait ExecutorBackend: Send {
    /// Start preparing and running `job` on `worker`.
    ///
    /// On `Ok` the implementation must eventually deliver exactly one
    /// `RuntimeEvent::JobFinished` for the job. On `Err` it never will, and
    /// the runtime fails the job itself.
    fn launch(
        &mut self,
        job: Job,
        worker: WorkerId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask a launched job to terminate.
    fn stop(
        &mut self,
        job: JobId,
        reason: StopReason,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
pub struct WorkerExecutor {
    tx: mpsc::Sender<ExecRequest>,
    workers: HashMap<WorkerId, Arc<dyn Worker>>,
}

impl WorkerExecutor {
    /// Spawn the background executor loop for the pool's workers.
    pub fn new(
        pool: &WorkerPool,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        emitter: EventEmitter,
        settings: RunnerSettings,
    ) -> Self {
        let tx = spawn_executor(runtime_tx, emitter, settings);
        let workers = pool
            .workers()
            .iter()
            .map(|w| (w.id().to_string(), Arc::clone(w)))
            .collect();
        Self { tx, workers }
    }
}

impl ExecutorBackend for WorkerExecutor {
    fn launch(
        &mut self,
        job: Job,
        worker: WorkerId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone what the future needs so it doesn't borrow `self` across `await`.
        let tx = self.tx.clone();
        let resolved = self.workers.get(&worker).cloned();

        Box::pin(async move {
            let Some(target) = resolved else {
                warn!(job = %job.id, worker = %worker, "launch on unknown worker");
                return Err(WorkerError::configuration(worker, "worker is not in the pool").into());
            };
            tx.send(ExecRequest::Launch { job, worker: target })
                .await
                .map_err(|e| Error::msg(e.to_string()))?;
            Ok(())
        })
    }

    fn stop(
        &mut self,
        job: JobId,
        reason: StopReason,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            tx.send(ExecRequest::Stop { job, reason })
                .await
                .map_err(|e| Error::msg(e.to_string()))?;
            Ok(())
        })
    }
}
