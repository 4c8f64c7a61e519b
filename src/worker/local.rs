// src/worker/local.rs

//! Runs jobs as subprocesses of the orchestrator.

use std::sync::Arc;

use tokio::process::Command;
use tracing::debug;

use super::handle::{self, RunningHandle};
use super::probe::command_output;
use super::{BoxFuture, PreparedJob, Slots, Worker};
use crate::errors::WorkerError;
use crate::job::{template, Job};
use crate::types::TransportKind;

const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug)]
pub struct LocalWorker {
    id: String,
    slots: Arc<Slots>,
}

impl LocalWorker {
    pub fn new(id: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: id.into(),
            slots: Arc::new(Slots::new(capacity)),
        }
    }
}

fn shell_command(line: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(line);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    }
}

impl Worker for LocalWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Local
    }

    fn slots(&self) -> &Arc<Slots> {
        &self.slots
    }

    fn validate(&self) -> BoxFuture<'_, Result<(), WorkerError>> {
        Box::pin(async move {
            let probe = if cfg!(windows) { "exit 0" } else { "true" };
            let output = command_output(&self.id, shell_command(probe), PROBE_TIMEOUT).await?;
            if output.status.success() {
                Ok(())
            } else {
                Err(WorkerError::configuration(
                    &self.id,
                    "the system shell could not run a trivial command",
                ))
            }
        })
    }

    fn prepare<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<PreparedJob, WorkerError>> {
        Box::pin(async move {
            let wd = &job.command.working_dir;
            match tokio::fs::metadata(wd).await {
                Ok(meta) if meta.is_dir() => {}
                _ => {
                    return Err(WorkerError::launch(
                        &job.id,
                        format!("working directory {:?} does not exist", wd),
                    ));
                }
            }
            for input in &job.inputs {
                if tokio::fs::metadata(input).await.is_err() {
                    return Err(WorkerError::launch(
                        &job.id,
                        format!("input {:?} does not exist", input),
                    ));
                }
            }
            if let Some(parent) = job.log_path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }

            let command_line = template::render(&job.command.template, &job.local_template_vars());
            debug!(worker = %self.id, job = %job.id, cmd = %command_line, "prepared");

            Ok(PreparedJob {
                job_id: job.id.clone(),
                command_line,
                working_dir: wd.to_string_lossy().into_owned(),
                env: job.command.env.clone(),
                log_path: job.log_path.clone(),
                log_source: job.log_source,
            })
        })
    }

    fn start(&self, prepared: PreparedJob) -> BoxFuture<'_, Result<RunningHandle, WorkerError>> {
        Box::pin(async move {
            let mut cmd = shell_command(&prepared.command_line);
            cmd.current_dir(&prepared.working_dir).envs(&prepared.env);
            handle::spawn(
                &prepared.job_id,
                cmd,
                prepared.log_path,
                prepared.log_source,
            )
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{BatchSettings, JobConfig};
    use crate::types::LogSource;
    use crate::worker::ProcessProbe;
    use std::time::Duration;

    fn job_in(dir: &std::path::Path, cmd: &str) -> Job {
        let mut cfg = JobConfig::new(
            "j1",
            cmd,
            dir,
            dir.join("logs").join("j1.log"),
        );
        cfg.env.insert("GREETING".into(), "hello".into());
        Job::from_config(&cfg, &BatchSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn validate_accepts_a_working_shell() {
        LocalWorker::new("local", 1).validate().await.unwrap();
    }

    #[tokio::test]
    async fn prepare_rejects_missing_working_dir() {
        let worker = LocalWorker::new("local", 1);
        let job = job_in(std::path::Path::new("/definitely/not/here"), "true");
        let err = worker.prepare(&job).await.unwrap_err();
        assert!(matches!(err, WorkerError::Launch { .. }));
    }

    #[tokio::test]
    async fn runs_in_working_dir_with_env_and_stdout_log() {
        let dir = tempfile::tempdir().unwrap();
        let worker = LocalWorker::new("local", 1);
        let mut job = job_in(dir.path(), "echo $GREETING from {job}; pwd");
        job.log_source = LogSource::Stdout;

        let prepared = worker.prepare(&job).await.unwrap();
        assert_eq!(prepared.command_line, "echo $GREETING from j1; pwd");

        let mut handle = worker.start(prepared).await.unwrap();
        let exit = handle.wait_exit(Duration::from_secs(5)).await.unwrap();
        assert!(exit.success);
        assert_eq!(handle.poll_exit().unwrap(), Some(exit));

        let log = std::fs::read_to_string(dir.path().join("logs/j1.log")).unwrap();
        assert!(log.starts_with("hello from j1\n"));
    }

    #[tokio::test]
    async fn terminate_stops_a_sleeping_process() {
        let dir = tempfile::tempdir().unwrap();
        let worker = LocalWorker::new("local", 1);
        let job = job_in(dir.path(), "sleep 30");
        let prepared = worker.prepare(&job).await.unwrap();
        let mut handle = worker.start(prepared).await.unwrap();

        assert_eq!(handle.poll_exit().unwrap(), None);
        let exit = handle.terminate(Duration::from_secs(2)).await.unwrap();
        assert!(!exit.unwrap().success);
    }
}
