// src/worker/unsupported.rs

//! Placeholder for transports that are named in configuration but have no
//! implementation. Validation always fails, so such a worker never enters a
//! pool.

use std::sync::Arc;

use super::handle::RunningHandle;
use super::{BoxFuture, PreparedJob, Slots, Worker};
use crate::errors::WorkerError;
use crate::job::Job;
use crate::types::TransportKind;

#[derive(Debug)]
pub struct UnsupportedWorker {
    id: String,
    transport: TransportKind,
    slots: Arc<Slots>,
}

impl UnsupportedWorker {
    pub fn new(id: impl Into<String>, transport: TransportKind, capacity: usize) -> Self {
        Self {
            id: id.into(),
            transport,
            slots: Arc::new(Slots::new(capacity)),
        }
    }

    fn unsupported(&self) -> WorkerError {
        WorkerError::configuration(
            &self.id,
            format!("transport '{}' is not supported", self.transport),
        )
    }
}

impl Worker for UnsupportedWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn transport(&self) -> TransportKind {
        self.transport.clone()
    }

    fn slots(&self) -> &Arc<Slots> {
        &self.slots
    }

    fn validate(&self) -> BoxFuture<'_, Result<(), WorkerError>> {
        Box::pin(async move { Err(self.unsupported()) })
    }

    fn prepare<'a>(&'a self, _job: &'a Job) -> BoxFuture<'a, Result<PreparedJob, WorkerError>> {
        Box::pin(async move { Err(self.unsupported()) })
    }

    fn start(&self, _prepared: PreparedJob) -> BoxFuture<'_, Result<RunningHandle, WorkerError>> {
        Box::pin(async move { Err(self.unsupported()) })
    }
}
