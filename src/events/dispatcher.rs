// src/events/dispatcher.rs

//! Fan-out of execution events to observers.
//!
//! Every observer gets its own unbounded lane and a task draining it, so a
//! slow observer delays only itself and never the job that emitted the
//! event. Within a lane events keep emission order, which preserves per-job
//! ordering. Callbacks run on the blocking pool, so an observer may do
//! blocking I/O. A panicking observer is logged and keeps receiving events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

use super::{deliver, ExecutionEvent, Observer};

struct Lane {
    observer: Arc<dyn Observer>,
    tx: mpsc::UnboundedSender<Arc<ExecutionEvent>>,
}

/// Cheap, cloneable handle for emitting events into a [`Dispatcher`].
#[derive(Clone)]
pub struct EventEmitter {
    lanes: Arc<Vec<Lane>>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("lanes", &self.lanes.len())
            .finish()
    }
}

impl EventEmitter {
    /// An emitter with no observers; events are dropped.
    pub fn disconnected() -> Self {
        Self {
            lanes: Arc::new(Vec::new()),
        }
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let kind = event.kind();
        let event = Arc::new(event);
        for lane in self.lanes.iter() {
            if !lane.observer.handles(kind) {
                continue;
            }
            if lane.tx.send(Arc::clone(&event)).is_err() {
                debug!(job = %event.job(), "observer lane closed; event dropped");
            }
        }
    }
}

/// Owns the observer lanes for one batch.
pub struct Dispatcher {
    emitter: EventEmitter,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("observers", &self.workers.len())
            .finish()
    }
}

impl Dispatcher {
    /// Spawn one lane per observer. Must be called inside a Tokio runtime.
    pub fn new(observers: Vec<Arc<dyn Observer>>) -> Self {
        let mut lanes = Vec::with_capacity(observers.len());
        let mut workers = Vec::with_capacity(observers.len());

        for observer in observers {
            let (tx, mut rx) = mpsc::unbounded_channel::<Arc<ExecutionEvent>>();
            let lane_observer = Arc::clone(&observer);
            workers.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    // Observer callbacks may do blocking I/O: run them on the
                    // blocking pool, one at a time, so lane order holds.
                    let observer = Arc::clone(&lane_observer);
                    let delivered = task::spawn_blocking({
                        let event = Arc::clone(&event);
                        move || deliver(observer.as_ref(), &event)
                    })
                    .await;
                    if delivered.is_err() {
                        warn!(job = %event.job(), kind = ?event.kind(), "observer panicked while handling event");
                    }
                }
                if task::spawn_blocking(move || lane_observer.close()).await.is_err() {
                    warn!("observer panicked while closing");
                }
            }));
            lanes.push(Lane { observer, tx });
        }

        Self {
            emitter: EventEmitter {
                lanes: Arc::new(lanes),
            },
            workers,
        }
    }

    pub fn emitter(&self) -> EventEmitter {
        self.emitter.clone()
    }

    pub fn dispatch(&self, event: ExecutionEvent) {
        self.emitter.emit(event);
    }

    /// Close the lanes and wait up to `within` for observers to drain.
    ///
    /// Emitters still held elsewhere keep their lanes open; drop them first.
    pub async fn finish(self, within: Duration) {
        let Dispatcher { emitter, workers } = self;
        drop(emitter);
        let drain = async {
            for worker in workers {
                if let Err(e) = worker.await {
                    warn!(error = %e, "observer lane task failed");
                }
            }
        };
        if tokio::time::timeout(within, drain).await.is_err() {
            warn!(?within, "observers did not drain in time; remaining events dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, ObserverMut, Synchronized};

    #[derive(Default)]
    struct Collect {
        lines: Vec<String>,
        closed: bool,
    }

    impl ObserverMut for Collect {
        fn on_exec_message(&mut self, job: &str, text: &str) {
            self.lines.push(format!("{job}:{text}"));
        }
        fn close(&mut self) {
            self.closed = true;
        }
    }

    struct Panicky;

    impl Observer for Panicky {
        fn handles(&self, kind: EventKind) -> bool {
            kind == EventKind::ExecMessage
        }
        fn on_exec_message(&self, _job: &str, _text: &str) {
            panic!("observer bug");
        }
    }

    /// Blocks inside its callback until the test opens it.
    struct Gate {
        rx: std::sync::mpsc::Receiver<()>,
        opened: bool,
    }

    impl ObserverMut for Gate {
        fn on_exec_message(&mut self, _job: &str, _text: &str) {
            self.opened = self.rx.recv_timeout(Duration::from_secs(5)).is_ok();
        }
    }

    #[tokio::test]
    async fn blocking_observer_does_not_stall_the_runtime() {
        let (open_tx, open_rx) = std::sync::mpsc::channel();
        let gate = Arc::new(Synchronized::new(Gate {
            rx: open_rx,
            opened: false,
        }));
        let dispatcher = Dispatcher::new(vec![gate.clone() as Arc<dyn Observer>]);

        dispatcher.dispatch(ExecutionEvent::ExecMessage {
            job: "a".into(),
            text: "x".into(),
        });
        // The lane picks the event up and blocks in the observer meanwhile.
        tokio::time::sleep(Duration::from_millis(50)).await;
        open_tx.send(()).unwrap();
        dispatcher.finish(Duration::from_secs(10)).await;

        assert!(gate.lock().opened);
    }

    #[tokio::test]
    async fn per_job_order_is_preserved_and_panics_are_contained() {
        let collect = Arc::new(Synchronized::new(Collect::default()));
        let dispatcher = Dispatcher::new(vec![
            Arc::new(Panicky) as Arc<dyn Observer>,
            collect.clone() as Arc<dyn Observer>,
        ]);

        let emitter = dispatcher.emitter();
        let producer = tokio::spawn(async move {
            for i in 0..50 {
                emitter.emit(ExecutionEvent::ExecMessage {
                    job: "a".into(),
                    text: i.to_string(),
                });
            }
        });
        producer.await.unwrap();
        dispatcher.finish(Duration::from_secs(5)).await;

        let guard = collect.lock();
        let expected: Vec<String> = (0..50).map(|i| format!("a:{i}")).collect();
        assert_eq!(guard.lines, expected);
        assert!(guard.closed);
    }
}
