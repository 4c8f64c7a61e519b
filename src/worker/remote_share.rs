// src/worker/remote_share.rs

//! Commands on a remote host reached over ssh, with files exchanged through
//! a network share both sides can see.
//!
//! Inputs outside the share are copied into a per-job staging directory on
//! the share. The log and output must already live on the share so that the
//! orchestrator can read what the remote program writes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::handle::{self, RunningHandle};
use super::path_map::ShareMap;
use super::probe::tcp_reachable;
use super::ssh::SshTarget;
use super::{BoxFuture, PreparedJob, Slots, Worker};
use crate::config::WorkerConfig;
use crate::errors::WorkerError;
use crate::job::{shell_quote, template, Job, TemplateVars};
use crate::types::{SessionMode, TransportKind};

/// Directory under the share root where inputs are staged.
pub const STAGING_DIR: &str = ".jobwave-staging";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct RemoteShareWorker {
    id: String,
    slots: Arc<Slots>,
    ssh: SshTarget,
    share: ShareMap,
    session_mode: SessionMode,
    requires_desktop: bool,
}

impl RemoteShareWorker {
    /// Build from an already validated configuration entry.
    pub fn from_config(id: &str, cfg: &WorkerConfig) -> Self {
        let session_mode = cfg.effective_session_mode();
        Self {
            id: id.to_string(),
            slots: Arc::new(Slots::new(cfg.capacity)),
            ssh: SshTarget::from_config(id, cfg, session_mode == SessionMode::Interactive),
            share: ShareMap::new(
                cfg.share_local.clone().unwrap_or_default(),
                cfg.share_remote.clone().unwrap_or_default(),
            ),
            session_mode,
            requires_desktop: cfg.effective_requires_desktop(),
        }
    }

    fn staging_dir(&self, job: &Job) -> PathBuf {
        self.share.local_root().join(STAGING_DIR).join(&job.id)
    }

    fn remote(&self, job: &Job, path: &Path, what: &str) -> Result<String, WorkerError> {
        self.share.to_remote(path).ok_or_else(|| {
            WorkerError::launch(
                &job.id,
                format!("{what} {:?} is not on the share {:?}", path, self.share.local_root()),
            )
        })
    }

    /// Copy `input` into staging unless it already lives on the share.
    /// Re-copies only when size differs, so repeated prepares are cheap.
    async fn stage_input(&self, job: &Job, input: &Path) -> Result<PathBuf, WorkerError> {
        if self.share.contains(input) {
            return Ok(input.to_path_buf());
        }
        let name = input
            .file_name()
            .ok_or_else(|| WorkerError::launch(&job.id, format!("input {:?} has no file name", input)))?;
        let staging = self.staging_dir(job);
        tokio::fs::create_dir_all(&staging).await?;
        let dest = staging.join(name);

        let src_meta = tokio::fs::metadata(input)
            .await
            .map_err(|e| WorkerError::launch(&job.id, format!("input {:?}: {e}", input)))?;
        let up_to_date = matches!(
            tokio::fs::metadata(&dest).await,
            Ok(m) if m.len() == src_meta.len()
        );
        if !up_to_date {
            tokio::fs::copy(input, &dest).await?;
            debug!(worker = %self.id, job = %job.id, from = ?input, to = ?dest, "staged input");
        }
        Ok(dest)
    }
}

impl Worker for RemoteShareWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn transport(&self) -> TransportKind {
        TransportKind::RemoteShare
    }

    fn slots(&self) -> &Arc<Slots> {
        &self.slots
    }

    fn validate(&self) -> BoxFuture<'_, Result<(), WorkerError>> {
        Box::pin(async move {
            if self.session_mode == SessionMode::Background && self.requires_desktop {
                return Err(WorkerError::configuration(
                    &self.id,
                    "a background session cannot host a program that requires a desktop",
                ));
            }
            match tokio::fs::metadata(self.share.local_root()).await {
                Ok(m) if m.is_dir() => {}
                _ => {
                    return Err(WorkerError::configuration(
                        &self.id,
                        format!("share mount {:?} is not an accessible directory", self.share.local_root()),
                    ));
                }
            }
            self.ssh.resolve_identity()?;
            tcp_reachable(&self.id, self.ssh.host(), self.ssh.port(), PROBE_TIMEOUT).await?;
            info!(worker = %self.id, host = %self.ssh.host(), "remote share worker validated");
            Ok(())
        })
    }

    fn prepare<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<PreparedJob, WorkerError>> {
        Box::pin(async move {
            let mut inputs = Vec::with_capacity(job.inputs.len());
            for input in &job.inputs {
                let staged = self.stage_input(job, input).await?;
                inputs.push(self.remote(job, &staged, "input")?);
            }

            let log = self.remote(job, &job.log_path, "log")?;
            if let Some(parent) = job.log_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let output = match &job.output {
                Some(out) => Some(self.remote(job, out, "output")?),
                None => None,
            };
            // A working directory off the share is taken as a remote-native path.
            let wd = &job.command.working_dir;
            let workdir = self
                .share
                .to_remote(wd)
                .unwrap_or_else(|| wd.to_string_lossy().into_owned());

            let vars = TemplateVars {
                job: job.id.clone(),
                workdir: workdir.clone(),
                log,
                output,
                inputs,
            };
            let command_line = template::render(&job.command.template, &vars);

            Ok(PreparedJob {
                job_id: job.id.clone(),
                command_line,
                working_dir: workdir,
                env: job.command.env.clone(),
                log_path: job.log_path.clone(),
                log_source: job.log_source,
            })
        })
    }

    fn start(&self, prepared: PreparedJob) -> BoxFuture<'_, Result<RunningHandle, WorkerError>> {
        Box::pin(async move {
            let remote = remote_line(&prepared);
            let cmd = self.ssh.command(&remote)?;
            handle::spawn(
                &prepared.job_id,
                cmd,
                prepared.log_path,
                prepared.log_source,
            )
        })
    }
}

/// `cd <wd> && env K=V ... <command>` for the remote shell.
fn remote_line(prepared: &PreparedJob) -> String {
    let mut line = format!("cd {} && ", shell_quote(&prepared.working_dir));
    if !prepared.env.is_empty() {
        line.push_str("env");
        for (k, v) in &prepared.env {
            line.push(' ');
            line.push_str(&shell_quote(&format!("{k}={v}")));
        }
        line.push(' ');
    }
    line.push_str(&prepared.command_line);
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchSettings, JobConfig};

    fn worker(share: &Path) -> RemoteShareWorker {
        let mut cfg = WorkerConfig::new(TransportKind::RemoteShare);
        cfg.host = Some("127.0.0.1".into());
        cfg.share_local = Some(share.to_path_buf());
        cfg.share_remote = Some(r"\\nas\jobs".into());
        cfg.requires_desktop = Some(false);
        cfg.session_mode = Some(SessionMode::Background);
        RemoteShareWorker::from_config("nas", &cfg)
    }

    #[tokio::test]
    async fn prepare_stages_inputs_and_translates_paths() {
        let share = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let input = outside.path().join("model.dat");
        std::fs::write(&input, "data").unwrap();

        let mut cfg = JobConfig::new(
            "case1",
            "solve {input} > {log}",
            share.path().join("case1"),
            share.path().join("case1").join("run.log"),
        );
        cfg.inputs = vec![input];
        let job = Job::from_config(&cfg, &BatchSettings::default()).unwrap();

        let w = worker(share.path());
        let prepared = w.prepare(&job).await.unwrap();
        assert_eq!(
            prepared.command_line,
            r"solve '\\nas\jobs\.jobwave-staging\case1\model.dat' > '\\nas\jobs\case1\run.log'"
        );
        assert_eq!(prepared.working_dir, r"\\nas\jobs\case1");
        assert!(share.path().join(STAGING_DIR).join("case1").join("model.dat").exists());

        // idempotent
        let again = w.prepare(&job).await.unwrap();
        assert_eq!(again, prepared);
    }

    #[tokio::test]
    async fn prepare_rejects_log_off_the_share() {
        let share = tempfile::tempdir().unwrap();
        let cfg = JobConfig::new("c", "solve", "/tmp", "/tmp/c.log");
        let job = Job::from_config(&cfg, &BatchSettings::default()).unwrap();
        let err = worker(share.path()).prepare(&job).await.unwrap_err();
        assert!(err.to_string().contains("not on the share"));
    }

    #[tokio::test]
    async fn validate_rejects_background_session_for_desktop_programs() {
        let share = tempfile::tempdir().unwrap();
        let mut cfg = WorkerConfig::new(TransportKind::RemoteShare);
        cfg.host = Some("127.0.0.1".into());
        cfg.share_local = Some(share.path().to_path_buf());
        cfg.share_remote = Some("/export".into());
        cfg.session_mode = Some(SessionMode::Background);
        let w = RemoteShareWorker::from_config("gui", &cfg);
        let err = w.validate().await.unwrap_err();
        assert!(matches!(err, WorkerError::Configuration { .. }));
    }

    #[test]
    fn remote_line_sets_directory_and_environment() {
        let mut prepared = PreparedJob {
            job_id: "j".into(),
            command_line: "run".into(),
            working_dir: "/w d".into(),
            env: Default::default(),
            log_path: "/l".into(),
            log_source: Default::default(),
        };
        prepared.env.insert("A".into(), "1".into());
        assert_eq!(remote_line(&prepared), "cd '/w d' && env A=1 run");
    }
}
