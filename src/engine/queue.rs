// src/engine/queue.rs

use std::collections::VecDeque;

use tracing::debug;

use crate::types::JobId;

/// FIFO of jobs waiting for a slot.
///
/// Semantics:
/// - Jobs leave in submission order; there are no priorities.
/// - A pending job can be removed (cancellation) without disturbing the
///   order of the rest.
/// - The queue is owned by the scheduler core. Other tasks reach it only
///   through runtime events, so pushes and pops are serialized.
#[derive(Debug, Default)]
pub struct PendingQueue {
    jobs: VecDeque<JobId>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: JobId) {
        debug!(job = %job, "queued");
        self.jobs.push_back(job);
    }

    pub fn pop(&mut self) -> Option<JobId> {
        self.jobs.pop_front()
    }

    /// Remove `job` if it is still waiting. Returns whether it was found.
    pub fn remove(&mut self, job: &str) -> bool {
        match self.jobs.iter().position(|j| j == job) {
            Some(idx) => {
                self.jobs.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, job: &str) -> bool {
        self.jobs.iter().any(|j| j == job)
    }

    /// Empty the queue, returning the jobs in order.
    pub fn drain(&mut self) -> Vec<JobId> {
        self.jobs.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
