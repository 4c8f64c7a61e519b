use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use jobwave::errors::WorkerError;
use jobwave::job::Job;
use jobwave::types::{JobId, TransportKind};
use jobwave::worker::{BoxFuture, LocalWorker, PreparedJob, RunningHandle, Slots, Worker};

/// A `Worker` whose validation and staging are scripted.
///
/// - `validate` never touches the network or spawns anything; it fails
///   when the worker was marked [`unreachable`](Self::unreachable).
/// - `prepare`/`start` fail for jobs marked with
///   [`fail_prepare`](Self::fail_prepare) / [`fail_start`](Self::fail_start).
/// - Everything else is delegated to a [`LocalWorker`], so jobs really run.
#[derive(Debug)]
pub struct ScriptedWorker {
    inner: LocalWorker,
    unreachable: Option<String>,
    failing_prepare: HashSet<JobId>,
    failing_start: HashSet<JobId>,
    prepared: Mutex<Vec<JobId>>,
}

impl ScriptedWorker {
    pub fn new(id: &str, capacity: usize) -> Self {
        Self {
            inner: LocalWorker::new(id, capacity),
            unreachable: None,
            failing_prepare: HashSet::new(),
            failing_start: HashSet::new(),
            prepared: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable(mut self, reason: &str) -> Self {
        self.unreachable = Some(reason.to_string());
        self
    }

    pub fn fail_prepare(mut self, job: &str) -> Self {
        self.failing_prepare.insert(job.to_string());
        self
    }

    pub fn fail_start(mut self, job: &str) -> Self {
        self.failing_start.insert(job.to_string());
        self
    }

    /// Jobs `prepare` was called for, in order.
    pub fn prepared(&self) -> Vec<JobId> {
        self.prepared.lock().unwrap().clone()
    }

    pub fn into_arc(self) -> Arc<dyn Worker> {
        Arc::new(self)
    }
}

impl Worker for ScriptedWorker {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Other("scripted".to_string())
    }

    fn slots(&self) -> &Arc<Slots> {
        self.inner.slots()
    }

    fn validate(&self) -> BoxFuture<'_, Result<(), WorkerError>> {
        let result = match &self.unreachable {
            Some(reason) => Err(WorkerError::connection(self.id(), reason.clone())),
            None => Ok(()),
        };
        Box::pin(async move { result })
    }

    fn prepare<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<PreparedJob, WorkerError>> {
        self.prepared.lock().unwrap().push(job.id.clone());
        if self.failing_prepare.contains(&job.id) {
            let err = WorkerError::launch(&job.id, "scripted preparation failure");
            return Box::pin(async move { Err(err) });
        }
        self.inner.prepare(job)
    }

    fn start(&self, prepared: PreparedJob) -> BoxFuture<'_, Result<RunningHandle, WorkerError>> {
        if self.failing_start.contains(&prepared.job_id) {
            let err = WorkerError::launch(&prepared.job_id, "scripted launch failure");
            return Box::pin(async move { Err(err) });
        }
        self.inner.start(prepared)
    }
}
