// src/monitor/mod.rs

//! Execution monitor: follows one job's log and decides when it is over.
//!
//! Completion is detected from two sources. A marker line written by the
//! target program is the primary signal; process liveness from the worker's
//! handle is the fallback for programs that never write one. Either way the
//! monitor finishes with one final read and a [`MonitorOutcome`].

pub mod tail;

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use regex::Regex;
use tracing::{debug, warn};

use crate::config::BatchSettings;
use crate::errors::JobError;
use crate::events::{EventEmitter, ExecutionEvent};
use crate::job::MarkerSpec;
use crate::types::JobId;
use crate::worker::{ExitInfo, ProcessProbe};

pub use tail::{LogTail, TailRead};

/// Compiled completion and failure markers.
#[derive(Debug, Clone, Default)]
pub struct Markers {
    completion: Option<Regex>,
    failure: Option<Regex>,
}

/// A marker matched on a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerHit {
    Completed,
    Failed(String),
}

impl Markers {
    pub fn compile(spec: &MarkerSpec) -> Result<Self, regex::Error> {
        Ok(Self {
            completion: spec.completion.as_deref().map(Regex::new).transpose()?,
            failure: spec.failure.as_deref().map(Regex::new).transpose()?,
        })
    }

    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    /// A failure marker wins over a completion marker on the same line.
    pub fn classify(&self, line: &str) -> Option<MarkerHit> {
        if self.failure.as_ref().is_some_and(|re| re.is_match(line)) {
            return Some(MarkerHit::Failed(line.to_string()));
        }
        if self.completion.as_ref().is_some_and(|re| re.is_match(line)) {
            return Some(MarkerHit::Completed);
        }
        None
    }
}

/// Timing knobs for one monitor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// How long the log may take to appear.
    pub log_grace: Duration,
    /// How long to wait for process exit after a marker.
    pub exit_grace: Duration,
    /// Upper bound on the whole run.
    pub monitor_timeout: Option<Duration>,
}

impl From<&BatchSettings> for MonitorSettings {
    fn from(s: &BatchSettings) -> Self {
        Self {
            poll_interval: s.poll_interval,
            log_grace: s.log_grace,
            exit_grace: s.exit_grace,
            monitor_timeout: s.monitor_timeout,
        }
    }
}

/// How monitoring ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Succeeded { exit_code: Option<i32> },
    Failed(JobError),
}

impl MonitorOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MonitorOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub outcome: MonitorOutcome,
    /// Byte offset consumed; pass to [`ExecutionMonitor::resume_from`].
    pub offset: u64,
}

/// Follows one job's log until a terminal signal.
#[derive(Debug)]
pub struct ExecutionMonitor {
    job: JobId,
    tail: LogTail,
    markers: Markers,
    settings: MonitorSettings,
    resumed_hit: Option<MarkerHit>,
}

impl ExecutionMonitor {
    /// `started` must be taken before the process was launched.
    pub fn new(
        job: impl Into<JobId>,
        log_path: impl Into<PathBuf>,
        started: SystemTime,
        markers: Markers,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            job: job.into(),
            tail: LogTail::new(log_path, started),
            markers,
            settings,
            resumed_hit: None,
        }
    }

    /// Skip content already delivered by an earlier monitor. The skipped
    /// prefix is scanned silently so a marker in it still ends the run.
    pub fn resume_from(mut self, offset: u64) -> Self {
        self.tail = self.tail.resume_at(offset);
        match self.tail.scan_consumed() {
            Ok(lines) => {
                self.resumed_hit = lines.iter().find_map(|l| self.markers.classify(l));
            }
            Err(e) => warn!(job = %self.job, error = %e, "could not rescan consumed log prefix"),
        }
        self
    }

    pub async fn run<P>(mut self, probe: &mut P, emitter: &EventEmitter) -> MonitorReport
    where
        P: ProcessProbe + ?Sized,
    {
        let begun = Instant::now();
        let mut seen_log = self.tail.offset() > 0;
        let mut hit = self.resumed_hit.take();

        loop {
            if hit.is_none() {
                match self.tail.poll() {
                    Ok(TailRead::Lines(lines)) => {
                        seen_log = true;
                        hit = self.emit_lines(lines, emitter);
                    }
                    Ok(TailRead::Missing | TailRead::Stale) => {}
                    Err(e) => warn!(job = %self.job, error = %e, "log read failed; retrying"),
                }
            }

            if let Some(marker) = hit.take() {
                debug!(job = %self.job, ?marker, "marker seen; waiting for exit");
                let exit = self.await_exit(probe).await;
                self.final_read(emitter);
                let outcome = match marker {
                    MarkerHit::Completed => MonitorOutcome::Succeeded {
                        exit_code: exit.and_then(|e| e.code),
                    },
                    MarkerHit::Failed(line) => MonitorOutcome::Failed(JobError::FailureMarker(line)),
                };
                return self.report(outcome);
            }

            match probe.poll_exit() {
                Ok(Some(exit)) => {
                    let (appeared, trailing_hit) = self.final_read(emitter);
                    let outcome = self.classify_exit(exit, seen_log || appeared, trailing_hit);
                    return self.report(outcome);
                }
                Ok(None) => {}
                Err(e) => warn!(job = %self.job, error = %e, "liveness check failed"),
            }

            if !seen_log && begun.elapsed() >= self.settings.log_grace {
                let path = self.tail.path().display().to_string();
                return self.report(MonitorOutcome::Failed(JobError::NoLog(path)));
            }
            if let Some(limit) = self.settings.monitor_timeout {
                if begun.elapsed() >= limit {
                    self.final_read(emitter);
                    return self.report(MonitorOutcome::Failed(JobError::Monitor(format!(
                        "no terminal signal within {limit:?}"
                    ))));
                }
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    fn emit_lines(&self, lines: Vec<String>, emitter: &EventEmitter) -> Option<MarkerHit> {
        let mut hit = None;
        for text in lines {
            if hit.is_none() {
                hit = self.markers.classify(&text);
            }
            emitter.emit(ExecutionEvent::ExecMessage {
                job: self.job.clone(),
                text,
            });
        }
        hit
    }

    /// Returns whether the log was readable and any marker in the tail end.
    fn final_read(&mut self, emitter: &EventEmitter) -> (bool, Option<MarkerHit>) {
        match self.tail.read_to_end() {
            Ok(TailRead::Lines(lines)) => (true, self.emit_lines(lines, emitter)),
            Ok(TailRead::Missing | TailRead::Stale) => (false, None),
            Err(e) => {
                warn!(job = %self.job, error = %e, "final log read failed");
                (false, None)
            }
        }
    }

    async fn await_exit<P>(&self, probe: &mut P) -> Option<ExitInfo>
    where
        P: ProcessProbe + ?Sized,
    {
        let deadline = Instant::now() + self.settings.exit_grace;
        let step = self.settings.poll_interval.min(Duration::from_millis(100));
        loop {
            match probe.poll_exit() {
                Ok(Some(exit)) => return Some(exit),
                Ok(None) => {}
                Err(e) => {
                    warn!(job = %self.job, error = %e, "liveness check failed");
                    return None;
                }
            }
            if Instant::now() >= deadline {
                debug!(job = %self.job, "process still alive after marker");
                return None;
            }
            tokio::time::sleep(step).await;
        }
    }

    fn classify_exit(&self, exit: ExitInfo, seen_log: bool, hit: Option<MarkerHit>) -> MonitorOutcome {
        match hit {
            Some(MarkerHit::Failed(line)) => return MonitorOutcome::Failed(JobError::FailureMarker(line)),
            Some(MarkerHit::Completed) => return MonitorOutcome::Succeeded { exit_code: exit.code },
            None => {}
        }
        if !seen_log {
            return MonitorOutcome::Failed(JobError::NoLog(self.tail.path().display().to_string()));
        }
        if self.markers.has_completion() {
            warn!(job = %self.job, code = ?exit.code, "process exited without completion marker; using exit status");
        }
        if exit.success {
            MonitorOutcome::Succeeded { exit_code: exit.code }
        } else {
            MonitorOutcome::Failed(JobError::Exit { code: exit.code })
        }
    }

    fn report(&self, outcome: MonitorOutcome) -> MonitorReport {
        debug!(job = %self.job, ?outcome, offset = self.tail.offset(), "monitor finished");
        MonitorReport {
            outcome,
            offset: self.tail.offset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_marker_wins() {
        let markers = Markers::compile(&MarkerSpec {
            completion: Some("^DONE".into()),
            failure: Some("ERROR|FATAL".into()),
        })
        .unwrap();
        assert_eq!(markers.classify("DONE"), Some(MarkerHit::Completed));
        assert_eq!(
            markers.classify("DONE with FATAL"),
            Some(MarkerHit::Failed("DONE with FATAL".into()))
        );
        assert_eq!(markers.classify("iteration 3"), None);
        assert!(Markers::compile(&MarkerSpec {
            completion: Some("(".into()),
            failure: None
        })
        .is_err());
    }
}
