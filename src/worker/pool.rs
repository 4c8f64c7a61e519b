// src/worker/pool.rs

//! Worker construction and pool validation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{
    ContainerShellWorker, LocalWorker, RemoteShareWorker, Slots, UnsupportedWorker, Worker,
};
use crate::config::WorkerConfig;
use crate::errors::WorkerError;
use crate::types::{TransportKind, WorkerId};

/// Instantiate the worker a configuration entry describes.
pub fn worker_from_config(id: &str, cfg: &WorkerConfig) -> Arc<dyn Worker> {
    match &cfg.transport {
        TransportKind::Local => Arc::new(LocalWorker::new(id, cfg.capacity)),
        TransportKind::RemoteShare => Arc::new(RemoteShareWorker::from_config(id, cfg)),
        TransportKind::ContainerShell => Arc::new(ContainerShellWorker::from_config(id, cfg)),
        other => Arc::new(UnsupportedWorker::new(id, other.clone(), cfg.capacity)),
    }
}

/// A worker that failed validation and was left out of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedWorker {
    pub id: WorkerId,
    pub transport: String,
    pub reason: String,
}

/// Validated workers available to one scheduler run.
///
/// Owned by the caller; there is no process-wide registry.
#[derive(Debug, Default)]
pub struct WorkerPool {
    workers: Vec<Arc<dyn Worker>>,
    excluded: Vec<ExcludedWorker>,
}

impl WorkerPool {
    /// Validate every candidate concurrently, each bounded by
    /// `validate_timeout`. Failures are logged and recorded, never fatal.
    /// A validation task that panics excludes its worker like any other
    /// failure. Candidate order is preserved.
    pub async fn build(candidates: Vec<Arc<dyn Worker>>, validate_timeout: Duration) -> Self {
        let mut set = JoinSet::new();
        let mut task_index = HashMap::new();
        for (idx, worker) in candidates.iter().enumerate() {
            let worker = Arc::clone(worker);
            let handle = set.spawn(async move {
                match tokio::time::timeout(validate_timeout, worker.validate()).await {
                    Ok(r) => r,
                    Err(_) => Err(WorkerError::connection(
                        worker.id(),
                        format!("validation did not finish within {validate_timeout:?}"),
                    )),
                }
            });
            task_index.insert(handle.id(), idx);
        }

        let mut results: Vec<Option<Result<(), WorkerError>>> =
            candidates.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next_with_id().await {
            let (task, result) = match joined {
                Ok((task, result)) => (task, result),
                Err(e) => {
                    let Some(&idx) = task_index.get(&e.id()) else {
                        warn!(error = %e, "validation task of an unknown worker failed");
                        continue;
                    };
                    let what = if e.is_panic() { "panicked" } else { "was cancelled" };
                    (
                        e.id(),
                        Err(WorkerError::configuration(
                            candidates[idx].id(),
                            format!("validation {what}"),
                        )),
                    )
                }
            };
            if let Some(&idx) = task_index.get(&task) {
                results[idx] = Some(result);
            }
        }

        let mut pool = WorkerPool::default();
        for (worker, result) in candidates.into_iter().zip(results) {
            let result = result.unwrap_or_else(|| {
                Err(WorkerError::configuration(worker.id(), "validation produced no result"))
            });
            match result {
                Ok(()) => {
                    info!(worker = %worker.id(), transport = %worker.transport(), capacity = worker.capacity(), "worker ready");
                    pool.workers.push(worker);
                }
                Err(e) => {
                    warn!(worker = %worker.id(), error = %e, "worker excluded from pool");
                    pool.excluded.push(ExcludedWorker {
                        id: worker.id().to_string(),
                        transport: worker.transport().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        pool
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Worker>> {
        self.workers.iter().find(|w| w.id() == id).cloned()
    }

    pub fn workers(&self) -> &[Arc<dyn Worker>] {
        &self.workers
    }

    pub fn excluded(&self) -> &[ExcludedWorker] {
        &self.excluded
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn total_capacity(&self) -> usize {
        self.workers.iter().map(|w| w.capacity()).sum()
    }

    /// Slot counters in pool order, for the scheduler core.
    pub fn slot_table(&self) -> Vec<(WorkerId, Arc<Slots>)> {
        self.workers
            .iter()
            .map(|w| (w.id().to_string(), Arc::clone(w.slots())))
            .collect()
    }
}
