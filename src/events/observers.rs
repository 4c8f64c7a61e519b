// src/events/observers.rs

//! Stock observers.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use super::{EventKind, Observer, ObserverMut};

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl Observer for SilentObserver {
    fn handles(&self, _kind: EventKind) -> bool {
        false
    }
}

/// Echoes events to stderr, one line each.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleObserver {
    /// Also echo every log line.
    pub messages: bool,
}

impl ConsoleObserver {
    pub fn new(messages: bool) -> Self {
        Self { messages }
    }

    fn line(&self, job: &str, text: std::fmt::Arguments<'_>) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "[{job}] {text}");
    }
}

impl Observer for ConsoleObserver {
    fn handles(&self, kind: EventKind) -> bool {
        self.messages || kind != EventKind::ExecMessage
    }

    fn on_prep_started(&self, job: &str, worker: &str) {
        self.line(job, format_args!("preparing on {worker}"));
    }

    fn on_exec_started(&self, job: &str, command: &str) {
        self.line(job, format_args!("started: {command}"));
    }

    fn on_exec_message(&self, job: &str, text: &str) {
        self.line(job, format_args!("| {text}"));
    }

    fn on_exec_completed(&self, job: &str, success: bool, duration: Duration) {
        let verdict = if success { "succeeded" } else { "failed" };
        self.line(job, format_args!("{verdict} after {:.1}s", duration.as_secs_f64()));
    }

    fn on_verify_result(&self, job: &str, verified: bool, detail: Option<&str>) {
        match (verified, detail) {
            (true, _) => self.line(job, format_args!("verified")),
            (false, Some(d)) => self.line(job, format_args!("verification rejected: {d}")),
            (false, None) => self.line(job, format_args!("verification rejected")),
        }
    }
}

/// Appends every event to `<dir>/<job>.log`, timestamped.
#[derive(Debug)]
pub struct JobLogObserver {
    dir: PathBuf,
    files: HashMap<String, File>,
}

impl JobLogObserver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: HashMap::new(),
        }
    }

    fn append(&mut self, job: &str, text: std::fmt::Arguments<'_>) {
        if !self.files.contains_key(job) {
            let path = self.dir.join(format!("{job}.log"));
            let opened = std::fs::create_dir_all(&self.dir).and_then(|_| {
                OpenOptions::new().create(true).append(true).open(&path)
            });
            match opened {
                Ok(f) => {
                    self.files.insert(job.to_string(), f);
                }
                Err(e) => {
                    warn!(job, path = ?path, error = %e, "cannot open job event log");
                    return;
                }
            }
        }
        if let Some(file) = self.files.get_mut(job) {
            let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
            if let Err(e) = writeln!(file, "{stamp} {text}") {
                warn!(job, error = %e, "writing job event log failed");
            }
        }
    }
}

impl ObserverMut for JobLogObserver {
    fn on_prep_started(&mut self, job: &str, worker: &str) {
        self.append(job, format_args!("prep_started worker={worker}"));
    }

    fn on_prep_completed(&mut self, job: &str) {
        self.append(job, format_args!("prep_completed"));
    }

    fn on_exec_started(&mut self, job: &str, command: &str) {
        self.append(job, format_args!("exec_started command={command}"));
    }

    fn on_exec_message(&mut self, job: &str, text: &str) {
        self.append(job, format_args!("message {text}"));
    }

    fn on_exec_completed(&mut self, job: &str, success: bool, duration: Duration) {
        self.append(
            job,
            format_args!("exec_completed success={success} duration_ms={}", duration.as_millis()),
        );
    }

    fn on_verify_result(&mut self, job: &str, verified: bool, detail: Option<&str>) {
        self.append(
            job,
            format_args!("verify_result verified={verified} detail={}", detail.unwrap_or("-")),
        );
    }

    fn close(&mut self) {
        for file in self.files.values_mut() {
            let _ = file.flush();
        }
        self.files.clear();
    }
}

/// Running tally of a batch, printed as `[done/total]` lines on stderr.
#[derive(Debug, Default, Clone)]
pub struct ProgressObserver {
    pub total: usize,
    pub started: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub quiet: bool,
}

impl ProgressObserver {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Count without printing.
    pub fn quiet(total: usize) -> Self {
        Self {
            total,
            quiet: true,
            ..Self::default()
        }
    }

    pub fn finished(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn running(&self) -> usize {
        self.started.saturating_sub(self.finished())
    }
}

impl ObserverMut for ProgressObserver {
    fn handles(&self, kind: EventKind) -> bool {
        matches!(kind, EventKind::ExecStarted | EventKind::ExecCompleted)
    }

    fn on_exec_started(&mut self, _job: &str, _command: &str) {
        self.started += 1;
    }

    fn on_exec_completed(&mut self, job: &str, success: bool, _duration: Duration) {
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        if !self.quiet {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(
                err,
                "[{}/{}] {job} {} ({} running, {} failed)",
                self.finished(),
                self.total,
                if success { "ok" } else { "FAILED" },
                self.running(),
                self.failed
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_log_observer_appends_per_job_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut obs = JobLogObserver::new(dir.path().join("events"));
        obs.on_prep_started("a", "local");
        obs.on_exec_message("a", "iteration 1");
        obs.on_exec_completed("b", false, Duration::from_millis(1500));
        obs.close();

        let a = std::fs::read_to_string(dir.path().join("events/a.log")).unwrap();
        let lines: Vec<_> = a.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("prep_started worker=local"));
        assert!(lines[1].ends_with("message iteration 1"));

        let b = std::fs::read_to_string(dir.path().join("events/b.log")).unwrap();
        assert!(b.contains("exec_completed success=false duration_ms=1500"));
    }

    #[test]
    fn progress_counts() {
        let mut p = ProgressObserver::quiet(3);
        p.on_exec_started("a", "x");
        p.on_exec_started("b", "x");
        p.on_exec_completed("a", true, Duration::ZERO);
        assert_eq!((p.running(), p.finished(), p.failed), (1, 1, 0));
        p.on_exec_completed("b", false, Duration::ZERO);
        assert_eq!((p.running(), p.succeeded, p.failed), (0, 1, 1));
    }
}
