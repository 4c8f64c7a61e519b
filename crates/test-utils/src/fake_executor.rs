use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use jobwave::engine::{JobOutcome, RuntimeEvent};
use jobwave::errors::Result;
use jobwave::exec::ExecutorBackend;
use jobwave::job::Job;
use jobwave::types::{JobId, StopReason, WorkerId};

/// What a [`FakeExecutor`] was asked to do, in order.
#[derive(Debug, Clone, Default)]
pub struct ExecLog {
    launches: Arc<Mutex<Vec<(JobId, WorkerId)>>>,
    stops: Arc<Mutex<Vec<(JobId, StopReason)>>>,
}

impl ExecLog {
    pub fn launches(&self) -> Vec<(JobId, WorkerId)> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launched_ids(&self) -> Vec<JobId> {
        self.launches().into_iter().map(|(j, _)| j).collect()
    }

    pub fn stops(&self) -> Vec<(JobId, StopReason)> {
        self.stops.lock().unwrap().clone()
    }
}

/// A fake executor that:
/// - records which jobs were launched where, and which were stopped
/// - immediately reports `JobStarted` followed by the job's scripted outcome
///   (success by default)
/// - keeps "held" jobs running until they are stopped.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    log: ExecLog,
    outcomes: HashMap<JobId, JobOutcome>,
    held: HashSet<JobId>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            log: ExecLog::default(),
            outcomes: HashMap::new(),
            held: HashSet::new(),
        }
    }

    pub fn with_outcome(mut self, job: &str, outcome: JobOutcome) -> Self {
        self.outcomes.insert(job.to_string(), outcome);
        self
    }

    /// `job` starts but only finishes once it is stopped.
    pub fn hold(mut self, job: &str) -> Self {
        self.held.insert(job.to_string());
        self
    }

    pub fn log(&self) -> ExecLog {
        self.log.clone()
    }

    /// Send from a separate task so the runtime never waits on its own
    /// channel.
    fn send_later(&self, events: Vec<RuntimeEvent>) {
        let tx = self.runtime_tx.clone();
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
    }
}

impl ExecutorBackend for FakeExecutor {
    fn launch(
        &mut self,
        job: Job,
        worker: WorkerId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.log
            .launches
            .lock()
            .unwrap()
            .push((job.id.clone(), worker));

        let mut events = vec![RuntimeEvent::JobStarted { job: job.id.clone() }];
        if !self.held.contains(&job.id) {
            let outcome = self
                .outcomes
                .get(&job.id)
                .cloned()
                .unwrap_or(JobOutcome::Succeeded { exit_code: Some(0) });
            events.push(RuntimeEvent::JobFinished {
                job: job.id.clone(),
                outcome,
            });
        }
        self.send_later(events);
        Box::pin(async { Ok(()) })
    }

    fn stop(
        &mut self,
        job: JobId,
        reason: StopReason,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.log.stops.lock().unwrap().push((job.clone(), reason));
        if self.held.remove(&job) {
            self.send_later(vec![RuntimeEvent::JobFinished {
                job,
                outcome: JobOutcome::Stopped {
                    reason,
                    error: None,
                },
            }]);
        }
        Box::pin(async { Ok(()) })
    }
}
