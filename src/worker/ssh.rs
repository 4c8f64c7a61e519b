// src/worker/ssh.rs

//! Building ssh-style client invocations for remote workers.

use std::path::PathBuf;

use tokio::process::Command;

use crate::config::WorkerConfig;
use crate::errors::WorkerError;

/// Where and how to reach a remote host.
///
/// The launcher must accept ssh's `-tt`, `-i` and `-p` flags.
#[derive(Debug, Clone)]
pub struct SshTarget {
    worker: String,
    launcher: Vec<String>,
    host: String,
    port: u16,
    user: Option<String>,
    credentials_ref: Option<String>,
    force_tty: bool,
}

impl SshTarget {
    pub fn from_config(worker: &str, cfg: &WorkerConfig, force_tty: bool) -> Self {
        Self {
            worker: worker.to_string(),
            launcher: cfg.effective_launcher(),
            host: cfg.host.clone().unwrap_or_default(),
            port: cfg.effective_port(),
            user: cfg.user.clone(),
            credentials_ref: cfg.credentials_ref.clone(),
            force_tty,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Identity file named by the `credentials_ref` environment variable.
    pub fn resolve_identity(&self) -> Result<Option<PathBuf>, WorkerError> {
        let Some(var) = &self.credentials_ref else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(v) if !v.trim().is_empty() => Ok(Some(PathBuf::from(v))),
            _ => Err(WorkerError::configuration(
                &self.worker,
                format!("credentials_ref '{var}' is not set in the environment"),
            )),
        }
    }

    /// Argument vector (without the program) running `remote` on the host.
    pub fn args(&self, remote: &str, identity: Option<&PathBuf>) -> Vec<String> {
        let mut args: Vec<String> = self.launcher.iter().skip(1).cloned().collect();
        if self.force_tty {
            args.push("-tt".into());
        }
        if let Some(id) = identity {
            args.push("-i".into());
            args.push(id.to_string_lossy().into_owned());
        }
        args.push("-p".into());
        args.push(self.port.to_string());
        args.push(match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        });
        args.push(remote.to_string());
        args
    }

    /// Client command running `remote` on the host.
    pub fn command(&self, remote: &str) -> Result<Command, WorkerError> {
        let identity = self.resolve_identity()?;
        let program = self
            .launcher
            .first()
            .ok_or_else(|| WorkerError::configuration(&self.worker, "launcher is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(self.args(remote, identity.as_ref()));
        Ok(cmd)
    }
}
