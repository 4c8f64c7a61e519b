// tests/monitor_resume.rs

mod common;
use crate::common::{init_tracing, with_timeout, Recorder};

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use jobwave::errors::JobError;
use jobwave::events::{Dispatcher, Synchronized};
use jobwave::job::MarkerSpec;
use jobwave::monitor::{ExecutionMonitor, Markers, MonitorOutcome, MonitorReport, MonitorSettings};
use jobwave::worker::{ExitInfo, ProcessProbe};

/// Reports a fixed exit state on every poll.
struct FakeProbe {
    exit: Option<ExitInfo>,
}

impl FakeProbe {
    fn exited(code: i32) -> Self {
        Self {
            exit: Some(ExitInfo {
                code: Some(code),
                success: code == 0,
            }),
        }
    }

    fn running() -> Self {
        Self { exit: None }
    }
}

impl ProcessProbe for FakeProbe {
    fn poll_exit(&mut self) -> std::io::Result<Option<ExitInfo>> {
        Ok(self.exit)
    }
}

fn settings() -> MonitorSettings {
    MonitorSettings {
        poll_interval: Duration::from_millis(10),
        log_grace: Duration::from_millis(300),
        exit_grace: Duration::from_millis(100),
        monitor_timeout: None,
    }
}

fn markers(completion: Option<&str>) -> Markers {
    Markers::compile(&MarkerSpec {
        completion: completion.map(str::to_string),
        failure: Some("FATAL".to_string()),
    })
    .unwrap()
}

fn append(path: &Path, bytes: &[u8]) {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(bytes).unwrap();
}

/// Run one monitor and return its report plus the messages it emitted.
async fn watch(
    monitor: ExecutionMonitor,
    probe: &mut FakeProbe,
) -> (MonitorReport, Vec<String>) {
    let recorder = Arc::new(Synchronized::new(Recorder::default()));
    let dispatcher = Dispatcher::new(vec![Recorder::as_observer(&recorder)]);
    let emitter = dispatcher.emitter();
    let report = with_timeout(monitor.run(probe, &emitter)).await;
    drop(emitter);
    dispatcher.finish(Duration::from_secs(5)).await;
    let messages = recorder.lock().of("j");
    (report, messages)
}

#[tokio::test]
async fn resumed_monitor_skips_delivered_lines() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run.log");
    let started = SystemTime::now();
    append(&log, b"one\ntwo\n");

    let first = ExecutionMonitor::new("j", &log, started, markers(None), settings());
    let (report, messages) = watch(first, &mut FakeProbe::exited(0)).await;
    assert_eq!(report.outcome, MonitorOutcome::Succeeded { exit_code: Some(0) });
    assert_eq!(report.offset, 8);
    assert_eq!(messages, vec!["message one", "message two"]);

    append(&log, b"three\n");
    let second = ExecutionMonitor::new("j", &log, started, markers(None), settings())
        .resume_from(report.offset);
    let (report, messages) = watch(second, &mut FakeProbe::exited(0)).await;
    assert_eq!(report.outcome, MonitorOutcome::Succeeded { exit_code: Some(0) });
    assert_eq!(report.offset, 14);
    assert_eq!(messages, vec!["message three"]);
}

#[tokio::test]
async fn marker_in_consumed_prefix_still_ends_a_resumed_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run.log");
    let started = SystemTime::now();
    append(&log, b"working\nSOLVER DONE\n");
    let len = std::fs::metadata(&log).unwrap().len();

    // Resuming twice from the same offset gives the same answer and
    // re-delivers nothing.
    for _ in 0..2 {
        let monitor = ExecutionMonitor::new("j", &log, started, markers(Some("DONE$")), settings())
            .resume_from(len);
        let (report, messages) = watch(monitor, &mut FakeProbe::running()).await;
        assert_eq!(report.outcome, MonitorOutcome::Succeeded { exit_code: None });
        assert_eq!(report.offset, len);
        assert!(messages.is_empty(), "re-delivered {messages:?}");
    }
}

#[tokio::test]
async fn failure_marker_in_consumed_prefix_fails_a_resumed_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run.log");
    let started = SystemTime::now();
    append(&log, b"FATAL: license lost\n");

    let monitor = ExecutionMonitor::new("j", &log, started, markers(Some("DONE$")), settings())
        .resume_from(20);
    let (report, _) = watch(monitor, &mut FakeProbe::exited(0)).await;
    assert_eq!(
        report.outcome,
        MonitorOutcome::Failed(JobError::FailureMarker("FATAL: license lost".into()))
    );
}

#[tokio::test]
async fn log_left_over_from_an_earlier_run_is_ignored() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run.log");
    append(&log, b"SOLVER DONE\n");

    // The job "started" well after the file was last written.
    let started = SystemTime::now() + Duration::from_secs(60);
    let monitor = ExecutionMonitor::new("j", &log, started, markers(Some("DONE$")), settings());
    let (report, messages) = watch(monitor, &mut FakeProbe::exited(0)).await;

    assert!(matches!(report.outcome, MonitorOutcome::Failed(JobError::NoLog(_))));
    assert!(messages.is_empty());
}

#[tokio::test]
async fn missing_log_fails_after_the_grace_period() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("never.log");

    let monitor = ExecutionMonitor::new("j", &log, SystemTime::now(), markers(None), settings());
    let (report, _) = watch(monitor, &mut FakeProbe::running()).await;
    match report.outcome {
        MonitorOutcome::Failed(JobError::NoLog(path)) => assert!(path.ends_with("never.log")),
        other => panic!("expected NoLog, got {other:?}"),
    }
}

#[tokio::test]
async fn monitor_timeout_bounds_a_silent_job() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run.log");
    let started = SystemTime::now();
    append(&log, b"iteration 1\n");

    let mut s = settings();
    s.monitor_timeout = Some(Duration::from_millis(150));
    let monitor = ExecutionMonitor::new("j", &log, started, markers(Some("DONE$")), s);
    let (report, messages) = watch(monitor, &mut FakeProbe::running()).await;

    assert!(matches!(report.outcome, MonitorOutcome::Failed(JobError::Monitor(_))));
    assert_eq!(messages, vec!["message iteration 1"]);
}

#[tokio::test]
async fn exit_status_decides_without_completion_marker() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run.log");
    let started = SystemTime::now();
    append(&log, b"partial output without newline");

    let monitor = ExecutionMonitor::new("j", &log, started, markers(None), settings());
    let (report, messages) = watch(monitor, &mut FakeProbe::exited(4)).await;

    assert_eq!(
        report.outcome,
        MonitorOutcome::Failed(JobError::Exit { code: Some(4) })
    );
    assert_eq!(messages, vec!["message partial output without newline"]);
}
