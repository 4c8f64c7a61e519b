// src/exec/mod.rs

//! Job execution layer.
//!
//! This module runs launched jobs on their workers and reports back to the
//! orchestration runtime via `RuntimeEvent`s.
//!
//! - [`executor_loop`] owns the main executor loop which tracks running jobs
//!   and forwards stop requests.
//! - [`job_runner`] drives one job through prepare, start and monitoring.
//! - [`backend`] provides the `ExecutorBackend` trait and the concrete
//!   `WorkerExecutor` that the runtime uses in production, and which tests
//!   can replace with a fake implementation.

pub mod backend;
pub mod executor_loop;
pub mod job_runner;

pub use backend::{ExecutorBackend, WorkerExecutor};
pub use executor_loop::spawn_executor;
pub use job_runner::{run_job, RunnerSettings};
