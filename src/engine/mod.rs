// src/engine/mod.rs

//! Wave coordinator.
//!
//! This module ties together:
//! - the pending queue (FIFO of submission order)
//! - per-worker slot accounting
//! - the main runtime event loop that reacts to:
//!   - jobs starting and finishing
//!   - cancellation requests (CLI, Ctrl-C)
//!   - timeout and termination-backstop timers
//!
//! The pure core state machine lives in [`core`] and [`event_handlers`]; the
//! async/IO shell is implemented in [`runtime`]. [`control`] turns cancel
//! request files into runtime events.

use std::time::Duration;

use crate::errors::JobError;
use crate::types::{JobId, StopReason};

/// How a job runner says a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job ran to completion and was judged successful.
    Succeeded { exit_code: Option<i32> },
    /// Preparation, launch, the process or monitoring failed.
    Failed {
        error: JobError,
        exit_code: Option<i32>,
    },
    /// The job was terminated on request. `error` is set when termination
    /// could not be confirmed.
    Stopped {
        reason: StopReason,
        error: Option<JobError>,
    },
}

/// Which timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// The job's own maximum running time.
    Timeout,
    /// Deadline for a requested termination to be confirmed.
    TerminationBackstop,
}

/// Events flowing into the runtime from job runners, timers and control
/// surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// The job's process was launched (`Preparing → Running`).
    JobStarted { job: JobId },
    /// The job's runner finished; exactly one per launched job.
    JobFinished { job: JobId, outcome: JobOutcome },
    /// Cancel one job, whatever its state.
    CancelRequested { job: JobId },
    /// Cancel every job that is not yet terminal (e.g. Ctrl-C).
    CancelAll,
    /// A timer armed by the core elapsed.
    TimerFired { job: JobId, kind: TimerKind },
}

/// Slack added to the termination backstop beyond two grace periods.
pub const BACKSTOP_SLACK: Duration = Duration::from_secs(1);

pub mod control;
pub mod core;
pub mod event_handlers;
pub mod queue;
pub mod runtime;

pub use core::CoreScheduler;
pub use event_handlers::{CoreCommand, CoreStep};
pub use queue::PendingQueue;
pub use runtime::Runtime;
