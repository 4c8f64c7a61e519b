use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use jobwave::config::{BatchSettings, JobConfig};
use jobwave::engine::{CoreCommand, CoreScheduler, CoreStep, JobOutcome, RuntimeEvent, TimerKind};
use jobwave::errors::JobError;
use jobwave::job::Job;
use jobwave::types::StopReason;
use jobwave::worker::Slots;

#[derive(Debug, Clone)]
enum Action {
    /// Report the outcome of the n-th job still holding a slot.
    Finish(usize, u8),
    /// Cancel the n-th job of the batch, whatever its state.
    Cancel(usize),
    CancelAll,
    /// Fire the termination backstop of the n-th job holding a slot.
    Backstop(usize),
    /// Fire the timeout of the n-th job holding a slot.
    Timeout(usize),
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        6 => (any::<usize>(), 0u8..3).prop_map(|(i, k)| Action::Finish(i, k)),
        2 => any::<usize>().prop_map(Action::Cancel),
        1 => Just(Action::CancelAll),
        1 => any::<usize>().prop_map(Action::Backstop),
        1 => any::<usize>().prop_map(Action::Timeout),
    ]
}

fn jobs(n: usize) -> Vec<Job> {
    (0..n)
        .map(|i| {
            let cfg = JobConfig::new(format!("j{i:02}"), "true", "/w", format!("/w/j{i}.log"));
            Job::from_config(&cfg, &BatchSettings::default()).unwrap()
        })
        .collect()
}

/// Drives a core the way the runtime would and checks invariants after
/// every step.
struct Harness {
    core: CoreScheduler,
    slots: Vec<(String, Arc<Slots>)>,
    /// Launched and not yet seen terminal, in launch order.
    holding: Vec<String>,
    started: HashSet<String>,
    launch_order: Vec<String>,
    keep_running: bool,
}

impl Harness {
    fn new(capacities: &[usize], n: usize) -> Self {
        let slots: Vec<_> = capacities
            .iter()
            .enumerate()
            .map(|(i, c)| (format!("w{i}"), Arc::new(Slots::new(*c))))
            .collect();
        let core = CoreScheduler::new(slots.clone(), Duration::from_secs(1));
        let mut h = Self {
            core,
            slots,
            holding: Vec::new(),
            started: HashSet::new(),
            launch_order: Vec::new(),
            keep_running: true,
        };
        let step = h.core.submit(jobs(n));
        h.absorb(step);
        h
    }

    fn absorb(&mut self, step: CoreStep) {
        for command in &step.commands {
            if let CoreCommand::Launch { job, worker } = command {
                assert!(self.slots.iter().any(|(w, _)| w == worker));
                self.holding.push(job.id.clone());
                self.launch_order.push(job.id.clone());
            }
        }
        self.keep_running = step.keep_running;
        let core = &self.core;
        self.holding
            .retain(|id| core.job(id).is_some_and(|j| !j.is_terminal()));
        self.check();
    }

    fn check(&self) {
        let mut all_full = true;
        for (id, slots) in &self.slots {
            let active = self.core.active_on(id);
            assert_eq!(active, slots.in_use(), "slot counter drifted on {id}");
            assert!(active <= slots.capacity(), "{id} over capacity");
            all_full &= slots.free() == 0;
        }
        if self.core.pending() > 0 {
            assert!(all_full, "capacity idle while {} jobs pend", self.core.pending());
        }
        let mut sorted = self.launch_order.clone();
        sorted.sort();
        assert_eq!(sorted, self.launch_order, "launches out of submission order");
        assert_eq!(self.keep_running, !self.core.is_complete());
    }

    fn step(&mut self, event: RuntimeEvent) {
        let step = self.core.step(event);
        self.absorb(step);
    }

    fn pick(&self, i: usize) -> Option<String> {
        if self.holding.is_empty() {
            None
        } else {
            Some(self.holding[i % self.holding.len()].clone())
        }
    }

    fn start(&mut self, job: &str) {
        if self.started.insert(job.to_string()) {
            self.step(RuntimeEvent::JobStarted { job: job.to_string() });
        }
    }

    fn apply(&mut self, action: Action, n: usize) {
        match action {
            Action::Finish(i, kind) => {
                let Some(job) = self.pick(i) else { return };
                self.start(&job);
                let outcome = match kind {
                    0 => JobOutcome::Succeeded { exit_code: Some(0) },
                    1 => JobOutcome::Failed {
                        error: JobError::Exit { code: Some(1) },
                        exit_code: Some(1),
                    },
                    _ => JobOutcome::Stopped {
                        reason: StopReason::Cancelled,
                        error: None,
                    },
                };
                self.step(RuntimeEvent::JobFinished { job, outcome });
            }
            Action::Cancel(i) => self.step(RuntimeEvent::CancelRequested {
                job: format!("j{:02}", i % n),
            }),
            Action::CancelAll => self.step(RuntimeEvent::CancelAll),
            Action::Backstop(i) => {
                let Some(job) = self.pick(i) else { return };
                self.step(RuntimeEvent::TimerFired {
                    job,
                    kind: TimerKind::TerminationBackstop,
                });
            }
            Action::Timeout(i) => {
                let Some(job) = self.pick(i) else { return };
                self.start(&job);
                self.step(RuntimeEvent::TimerFired {
                    job,
                    kind: TimerKind::Timeout,
                });
            }
        }
    }

    /// Let every remaining job succeed.
    fn drain(&mut self) {
        while let Some(job) = self.holding.first().cloned() {
            self.start(&job);
            self.step(RuntimeEvent::JobFinished {
                job,
                outcome: JobOutcome::Succeeded { exit_code: Some(0) },
            });
        }
    }
}

proptest! {
    #[test]
    fn capacity_is_respected_and_every_batch_completes(
        capacities in proptest::collection::vec(1usize..4, 1..4),
        n in 1usize..25,
        actions in proptest::collection::vec(action(), 0..60),
    ) {
        let mut h = Harness::new(&capacities, n);
        for action in actions {
            h.apply(action, n);
        }
        h.drain();

        prop_assert!(h.core.is_complete());
        prop_assert!(!h.keep_running);
        prop_assert_eq!(h.core.pending(), 0);
        for (_, slots) in &h.slots {
            prop_assert_eq!(slots.in_use(), 0);
        }
        let launched: HashSet<_> = h.launch_order.iter().collect();
        prop_assert_eq!(launched.len(), h.launch_order.len(), "a job was launched twice");
        prop_assert_eq!(h.core.jobs().len(), n);
    }

    #[test]
    fn without_cancellation_every_job_is_launched_once(
        capacities in proptest::collection::vec(1usize..4, 1..4),
        n in 1usize..25,
        picks in proptest::collection::vec(any::<usize>(), 0..40),
    ) {
        let mut h = Harness::new(&capacities, n);
        for i in picks {
            h.apply(Action::Finish(i, (i % 2) as u8), n);
        }
        h.drain();

        let expected: Vec<String> = (0..n).map(|i| format!("j{i:02}")).collect();
        prop_assert_eq!(&h.launch_order, &expected);
        prop_assert!(!h.keep_running);
    }
}
