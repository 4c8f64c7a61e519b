#![allow(dead_code)]

pub use jobwave_test_utils::builders;
pub use jobwave_test_utils::{init_tracing, with_timeout};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use jobwave::events::{Observer, ObserverMut, Synchronized};

/// Records every event as `"<job> <kind> [detail]"` and tracks how many
/// jobs were between `ExecStarted` and `ExecCompleted` at once.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<String>,
    running: HashSet<String>,
    pub max_running: usize,
}

impl Recorder {
    pub fn shared() -> Arc<Synchronized<Recorder>> {
        Arc::new(Synchronized::new(Recorder::default()))
    }

    pub fn as_observer(shared: &Arc<Synchronized<Recorder>>) -> Arc<dyn Observer> {
        shared.clone()
    }

    /// Events of one job, in delivery order.
    pub fn of(&self, job: &str) -> Vec<String> {
        let prefix = format!("{job} ");
        self.events
            .iter()
            .filter(|e| e.starts_with(&prefix))
            .map(|e| e[prefix.len()..].to_string())
            .collect()
    }
}

impl ObserverMut for Recorder {
    fn on_prep_started(&mut self, job: &str, worker: &str) {
        self.events.push(format!("{job} prep_started {worker}"));
    }

    fn on_prep_completed(&mut self, job: &str) {
        self.events.push(format!("{job} prep_completed"));
    }

    fn on_exec_started(&mut self, job: &str, _command: &str) {
        self.events.push(format!("{job} exec_started"));
        self.running.insert(job.to_string());
        self.max_running = self.max_running.max(self.running.len());
    }

    fn on_exec_message(&mut self, job: &str, text: &str) {
        self.events.push(format!("{job} message {text}"));
    }

    fn on_exec_completed(&mut self, job: &str, success: bool, _duration: Duration) {
        self.events.push(format!("{job} exec_completed {success}"));
        self.running.remove(job);
    }

    fn on_verify_result(&mut self, job: &str, verified: bool, _detail: Option<&str>) {
        self.events.push(format!("{job} verify_result {verified}"));
    }
}
