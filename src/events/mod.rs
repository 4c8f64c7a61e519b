// src/events/mod.rs

//! Job lifecycle events and the observer contract.
//!
//! - [`ExecutionEvent`] is the closed set of things observers can hear about.
//! - [`Observer`] has a no-op default for every callback plus a `handles`
//!   capability check the dispatcher consults before queueing an event.
//! - [`ObserverMut`] is the same contract for observers with mutable state;
//!   wrap one in [`Synchronized`] to share it across concurrent jobs.
//! - [`dispatcher`] fans events out, one ordered lane per observer.
//! - [`observers`] holds the stock observers selectable from the CLI.

pub mod dispatcher;
pub mod observers;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::types::{JobId, WorkerId};

pub use dispatcher::{Dispatcher, EventEmitter};

/// Something that happened to one job. Ordered per job only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    PrepStarted {
        job: JobId,
        worker: WorkerId,
    },
    PrepCompleted {
        job: JobId,
    },
    ExecStarted {
        job: JobId,
        command: String,
    },
    ExecMessage {
        job: JobId,
        text: String,
    },
    ExecCompleted {
        job: JobId,
        success: bool,
        duration: Duration,
    },
    VerifyResult {
        job: JobId,
        verified: bool,
        detail: Option<String>,
    },
}

/// Discriminant of [`ExecutionEvent`], used for capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PrepStarted,
    PrepCompleted,
    ExecStarted,
    ExecMessage,
    ExecCompleted,
    VerifyResult,
}

impl ExecutionEvent {
    pub fn job(&self) -> &str {
        match self {
            ExecutionEvent::PrepStarted { job, .. }
            | ExecutionEvent::PrepCompleted { job }
            | ExecutionEvent::ExecStarted { job, .. }
            | ExecutionEvent::ExecMessage { job, .. }
            | ExecutionEvent::ExecCompleted { job, .. }
            | ExecutionEvent::VerifyResult { job, .. } => job,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ExecutionEvent::PrepStarted { .. } => EventKind::PrepStarted,
            ExecutionEvent::PrepCompleted { .. } => EventKind::PrepCompleted,
            ExecutionEvent::ExecStarted { .. } => EventKind::ExecStarted,
            ExecutionEvent::ExecMessage { .. } => EventKind::ExecMessage,
            ExecutionEvent::ExecCompleted { .. } => EventKind::ExecCompleted,
            ExecutionEvent::VerifyResult { .. } => EventKind::VerifyResult,
        }
    }
}

/// Receives lifecycle events. Every callback is optional.
///
/// Implementations must be safe to call from several lanes at once; use
/// [`ObserverMut`] + [`Synchronized`] for observers that keep mutable state.
pub trait Observer: Send + Sync {
    /// Whether this observer wants events of `kind` at all.
    fn handles(&self, _kind: EventKind) -> bool {
        true
    }

    fn on_prep_started(&self, _job: &str, _worker: &str) {}
    fn on_prep_completed(&self, _job: &str) {}
    fn on_exec_started(&self, _job: &str, _command: &str) {}
    fn on_exec_message(&self, _job: &str, _text: &str) {}
    fn on_exec_completed(&self, _job: &str, _success: bool, _duration: Duration) {}
    fn on_verify_result(&self, _job: &str, _verified: bool, _detail: Option<&str>) {}

    /// Called once after the last event was delivered.
    fn close(&self) {}
}

/// [`Observer`] for implementations that need `&mut self`.
pub trait ObserverMut: Send {
    fn handles(&self, _kind: EventKind) -> bool {
        true
    }

    fn on_prep_started(&mut self, _job: &str, _worker: &str) {}
    fn on_prep_completed(&mut self, _job: &str) {}
    fn on_exec_started(&mut self, _job: &str, _command: &str) {}
    fn on_exec_message(&mut self, _job: &str, _text: &str) {}
    fn on_exec_completed(&mut self, _job: &str, _success: bool, _duration: Duration) {}
    fn on_verify_result(&mut self, _job: &str, _verified: bool, _detail: Option<&str>) {}
    fn close(&mut self) {}
}

/// Serializes every call into the wrapped observer.
#[derive(Debug, Default)]
pub struct Synchronized<O> {
    inner: Mutex<O>,
}

impl<O> Synchronized<O> {
    pub fn new(observer: O) -> Self {
        Self {
            inner: Mutex::new(observer),
        }
    }

    /// Direct access to the wrapped observer (e.g. to read counters).
    pub fn lock(&self) -> MutexGuard<'_, O> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<O: ObserverMut> Observer for Synchronized<O> {
    fn handles(&self, kind: EventKind) -> bool {
        self.lock().handles(kind)
    }

    fn on_prep_started(&self, job: &str, worker: &str) {
        self.lock().on_prep_started(job, worker)
    }

    fn on_prep_completed(&self, job: &str) {
        self.lock().on_prep_completed(job)
    }

    fn on_exec_started(&self, job: &str, command: &str) {
        self.lock().on_exec_started(job, command)
    }

    fn on_exec_message(&self, job: &str, text: &str) {
        self.lock().on_exec_message(job, text)
    }

    fn on_exec_completed(&self, job: &str, success: bool, duration: Duration) {
        self.lock().on_exec_completed(job, success, duration)
    }

    fn on_verify_result(&self, job: &str, verified: bool, detail: Option<&str>) {
        self.lock().on_verify_result(job, verified, detail)
    }

    fn close(&self) {
        self.lock().close()
    }
}

/// Route one event to the matching callback, honouring `handles`.
pub fn deliver(observer: &dyn Observer, event: &ExecutionEvent) {
    if !observer.handles(event.kind()) {
        return;
    }
    match event {
        ExecutionEvent::PrepStarted { job, worker } => observer.on_prep_started(job, worker),
        ExecutionEvent::PrepCompleted { job } => observer.on_prep_completed(job),
        ExecutionEvent::ExecStarted { job, command } => observer.on_exec_started(job, command),
        ExecutionEvent::ExecMessage { job, text } => observer.on_exec_message(job, text),
        ExecutionEvent::ExecCompleted {
            job,
            success,
            duration,
        } => observer.on_exec_completed(job, *success, *duration),
        ExecutionEvent::VerifyResult {
            job,
            verified,
            detail,
        } => observer.on_verify_result(job, *verified, detail.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    impl ObserverMut for Recorder {
        fn handles(&self, kind: EventKind) -> bool {
            kind != EventKind::ExecMessage
        }

        fn on_exec_started(&mut self, job: &str, command: &str) {
            self.seen.push(format!("{job}:{command}"));
        }

        fn on_exec_message(&mut self, job: &str, _text: &str) {
            self.seen.push(format!("{job}:message"));
        }
    }

    #[test]
    fn deliver_respects_capabilities_and_defaults() {
        let obs = Synchronized::new(Recorder::default());
        deliver(
            &obs,
            &ExecutionEvent::ExecStarted {
                job: "a".into(),
                command: "run".into(),
            },
        );
        deliver(
            &obs,
            &ExecutionEvent::ExecMessage {
                job: "a".into(),
                text: "hi".into(),
            },
        );
        deliver(&obs, &ExecutionEvent::PrepCompleted { job: "a".into() });
        assert_eq!(obs.lock().seen, vec!["a:run"]);
    }

    #[test]
    fn event_accessors() {
        let e = ExecutionEvent::ExecCompleted {
            job: "j".into(),
            success: true,
            duration: Duration::from_secs(1),
        };
        assert_eq!(e.job(), "j");
        assert_eq!(e.kind(), EventKind::ExecCompleted);
    }
}
