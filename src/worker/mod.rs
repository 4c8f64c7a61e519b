// src/worker/mod.rs

//! Execution backends.
//!
//! A [`Worker`] prepares a job's environment on its transport, starts the
//! command and hands back a [`RunningHandle`]. Capacity accounting lives in
//! [`Slots`], shared between the worker and the scheduler core.
//!
//! - [`local`]: subprocess in the current environment.
//! - [`remote_share`]: command on a remote host, files on a network share.
//! - [`container_shell`]: `docker exec` on a host reached over ssh.
//! - [`unsupported`]: stub for transports without an implementation.
//! - [`pool`]: validation and the caller-owned [`WorkerPool`].

pub mod container_shell;
pub mod handle;
pub mod local;
pub mod path_map;
pub mod pool;
pub mod probe;
pub mod remote_share;
pub mod ssh;
pub mod unsupported;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::errors::WorkerError;
use crate::job::Job;
use crate::types::{JobId, LogSource, TransportKind};

pub use container_shell::ContainerShellWorker;
pub use handle::{ExitInfo, ProcessProbe, RunningHandle};
pub use local::LocalWorker;
pub use pool::{worker_from_config, ExcludedWorker, WorkerPool};
pub use remote_share::RemoteShareWorker;
pub use unsupported::UnsupportedWorker;

/// Boxed future returned by worker operations (keeps `Worker` object safe).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A job staged for one particular transport.
///
/// `command_line`, `working_dir` and `env` are in the worker's view of the
/// world (translated paths); `log_path` is where the orchestrator can read
/// the growing log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedJob {
    pub job_id: JobId,
    pub command_line: String,
    pub working_dir: String,
    pub env: BTreeMap<String, String>,
    pub log_path: PathBuf,
    pub log_source: LogSource,
}

/// Contract every transport implements.
pub trait Worker: Send + Sync + Debug {
    fn id(&self) -> &str;

    fn transport(&self) -> TransportKind;

    fn slots(&self) -> &Arc<Slots>;

    /// Check reachability and capabilities. Called once before the worker
    /// may enter a pool.
    fn validate(&self) -> BoxFuture<'_, Result<(), WorkerError>>;

    /// Stage the job for this transport. Idempotent; touches only the job's
    /// own workspace.
    fn prepare<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<PreparedJob, WorkerError>>;

    /// Launch the prepared command.
    fn start(&self, prepared: PreparedJob) -> BoxFuture<'_, Result<RunningHandle, WorkerError>>;

    fn capacity(&self) -> usize {
        self.slots().capacity()
    }

    fn acquire_slot(&self) -> bool {
        self.slots().try_acquire()
    }

    fn release_slot(&self) {
        self.slots().release()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SlotState {
    in_use: usize,
    peak: usize,
}

/// Mutex-protected capacity counter. `in_use` never exceeds `capacity`.
#[derive(Debug)]
pub struct Slots {
    capacity: usize,
    state: Mutex<SlotState>,
}

impl Slots {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(SlotState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take one slot if any is free.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        if state.in_use >= self.capacity {
            return false;
        }
        state.in_use += 1;
        state.peak = state.peak.max(state.in_use);
        true
    }

    /// Give one slot back. Releasing an idle counter is a no-op.
    pub fn release(&self) {
        let mut state = self.lock();
        if state.in_use == 0 {
            tracing::warn!(capacity = self.capacity, "slot released while none in use");
            return;
        }
        state.in_use -= 1;
    }

    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    pub fn free(&self) -> usize {
        self.capacity - self.in_use()
    }

    /// Highest `in_use` ever observed.
    pub fn peak(&self) -> usize {
        self.lock().peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_never_exceed_capacity() {
        let slots = Slots::new(2);
        assert!(slots.try_acquire());
        assert!(slots.try_acquire());
        assert!(!slots.try_acquire());
        assert_eq!(slots.in_use(), 2);

        slots.release();
        assert_eq!(slots.free(), 1);
        assert!(slots.try_acquire());
        assert_eq!(slots.peak(), 2);
    }

    #[test]
    fn slots_release_on_idle_counter_is_ignored() {
        let slots = Slots::new(1);
        slots.release();
        assert_eq!(slots.in_use(), 0);
    }

    #[test]
    fn slots_are_safe_under_contention() {
        let slots = Arc::new(Slots::new(3));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slots = Arc::clone(&slots);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if slots.try_acquire() {
                            assert!(slots.in_use() <= 3);
                            slots.release();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(slots.in_use(), 0);
        assert!(slots.peak() <= 3);
    }
}
