// tests/runtime_fake_executor.rs

mod common;
use crate::common::builders::JobConfigBuilder;
use crate::common::{init_tracing, with_timeout};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use jobwave::config::BatchSettings;
use jobwave::engine::{CoreScheduler, JobOutcome, Runtime, RuntimeEvent};
use jobwave::errors::{JobError, JobwaveError};
use jobwave::exec::ExecutorBackend;
use jobwave::job::{Job, JobStatus};
use jobwave::report::{BatchStore, StoredStatus};
use jobwave::types::{JobId, StopReason, WorkerId};
use jobwave::worker::Slots;
use jobwave_test_utils::fake_executor::FakeExecutor;

fn jobs(ids: &[&str]) -> Vec<Job> {
    ids.iter()
        .map(|id| {
            let cfg = JobConfigBuilder::new(id, "run", "/work").build();
            Job::from_config(&cfg, &BatchSettings::default()).unwrap()
        })
        .collect()
}

fn core(workers: &[(&str, usize)]) -> (CoreScheduler, Vec<Arc<Slots>>) {
    let table: Vec<_> = workers
        .iter()
        .map(|(id, cap)| (id.to_string(), Arc::new(Slots::new(*cap))))
        .collect();
    let slots = table.iter().map(|(_, s)| Arc::clone(s)).collect();
    (CoreScheduler::new(table, Duration::from_millis(100)), slots)
}

#[tokio::test]
async fn all_jobs_finish_in_submission_order_with_bounded_capacity() {
    init_tracing();
    let (tx, rx) = mpsc::channel(64);
    let executor = FakeExecutor::new(tx.clone()).with_outcome(
        "c",
        JobOutcome::Failed {
            error: JobError::Exit { code: Some(3) },
            exit_code: Some(3),
        },
    );
    let log = executor.log();
    let (core, slots) = core(&[("w0", 2)]);

    let runtime = Runtime::new(core, rx, tx, executor);
    let done = with_timeout(runtime.run(jobs(&["a", "b", "c", "d", "e"])))
        .await
        .unwrap();

    assert_eq!(log.launched_ids(), vec!["a", "b", "c", "d", "e"]);
    assert!(log.launches().iter().all(|(_, w)| w == "w0"));
    let statuses: Vec<_> = done.iter().map(|j| j.status()).collect();
    assert_eq!(
        statuses,
        vec![
            JobStatus::Succeeded,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Succeeded,
            JobStatus::Succeeded
        ]
    );
    assert_eq!(done[2].exit_code, Some(3));
    assert_eq!(slots[0].in_use(), 0);
    assert!(slots[0].peak() <= 2);
}

#[tokio::test]
async fn cancel_all_stops_running_and_drops_pending() {
    init_tracing();
    let (tx, rx) = mpsc::channel(64);
    let executor = FakeExecutor::new(tx.clone()).hold("a");
    let log = executor.log();
    let (core, _) = core(&[("w0", 1)]);

    let runtime = Runtime::new(core, rx, tx.clone(), executor);
    let handle = tokio::spawn(runtime.run(jobs(&["a", "b", "c"])));

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(RuntimeEvent::CancelAll).await.unwrap();

    let done = with_timeout(handle).await.unwrap().unwrap();
    assert!(done.iter().all(|j| j.status() == JobStatus::Cancelled));
    assert!(done.iter().all(|j| j.error == Some(JobError::Cancelled)));
    assert_eq!(log.launched_ids(), vec!["a"]);
    assert_eq!(log.stops(), vec![("a".to_string(), StopReason::Cancelled)]);
}

#[tokio::test]
async fn timeout_stops_job_and_backfills_next() {
    init_tracing();
    let (tx, rx) = mpsc::channel(64);
    let executor = FakeExecutor::new(tx.clone()).hold("slow");
    let log = executor.log();
    let (core, _) = core(&[("w0", 1)]);

    let mut batch = jobs(&["slow", "next"]);
    batch[0].timeout = Some(Duration::from_millis(50));

    let runtime = Runtime::new(core, rx, tx, executor);
    let done = with_timeout(runtime.run(batch)).await.unwrap();

    assert_eq!(done[0].status(), JobStatus::TimedOut);
    assert_eq!(done[0].error, Some(JobError::Timeout { after_ms: 50 }));
    assert_eq!(done[1].status(), JobStatus::Succeeded);
    assert_eq!(log.stops(), vec![("slow".to_string(), StopReason::TimedOut)]);
    assert_eq!(log.launched_ids(), vec!["slow", "next"]);
}

#[tokio::test]
async fn snapshots_track_settled_jobs() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let store = BatchStore::new(tmp.path(), "snap");
    store.create().unwrap();

    let (tx, rx) = mpsc::channel(64);
    let executor = FakeExecutor::new(tx.clone());
    let (core, _) = core(&[("w0", 1), ("w1", 1)]);

    let runtime = Runtime::new(core, rx, tx, executor).with_snapshots(store.clone());
    with_timeout(runtime.run(jobs(&["a", "b", "c"]))).await.unwrap();

    match store.read_status().unwrap() {
        StoredStatus::InFlight(snapshot) => {
            assert_eq!(snapshot.counts.succeeded, 3);
            assert_eq!(snapshot.jobs.len(), 3);
        }
        other => panic!("expected a snapshot, got {other:?}"),
    }
}

/// Accepts every launch and never reports back.
struct Forgetful;

impl ExecutorBackend for Forgetful {
    fn launch(
        &mut self,
        _job: Job,
        _worker: WorkerId,
    ) -> Pin<Box<dyn Future<Output = jobwave::errors::Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn stop(
        &mut self,
        _job: JobId,
        _reason: StopReason,
    ) -> Pin<Box<dyn Future<Output = jobwave::errors::Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

#[tokio::test]
async fn losing_every_producer_ends_the_run_with_an_error() {
    init_tracing();
    let (tx, rx) = mpsc::channel(8);
    let (core, _) = core(&[("w0", 1)]);

    // The runtime's own sender does not keep the channel open.
    let runtime = Runtime::new(core, rx, tx, Forgetful);
    match with_timeout(runtime.run(jobs(&["a", "b"]))).await {
        Err(JobwaveError::Other(e)) => assert!(e.to_string().contains("2 unfinished"), "{e}"),
        other => panic!("expected the run to fail, got {other:?}"),
    }
}
