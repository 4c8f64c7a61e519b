// src/worker/handle.rs

//! Handle to a launched command.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::errors::WorkerError;
use crate::types::{JobId, LogSource};

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub success: bool,
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
        }
    }
}

/// Liveness source for the execution monitor.
pub trait ProcessProbe: Send {
    /// `Ok(None)` while the process is still running.
    fn poll_exit(&mut self) -> std::io::Result<Option<ExitInfo>>;
}

/// A running job: the local child process (the command itself, or the
/// ssh client driving it) plus where its log grows.
#[derive(Debug)]
pub struct RunningHandle {
    job_id: JobId,
    child: Child,
    log_path: PathBuf,
    exit: Option<ExitInfo>,
}

impl RunningHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Exit information once the process is known to have ended.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit
    }

    /// Wait up to `within` for the process to exit on its own.
    pub async fn wait_exit(&mut self, within: Duration) -> Option<ExitInfo> {
        if self.exit.is_some() {
            return self.exit;
        }
        match tokio::time::timeout(within, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit = Some(status.into());
                self.exit
            }
            Ok(Err(e)) => {
                warn!(job = %self.job_id, error = %e, "waiting for process failed");
                None
            }
            Err(_) => None,
        }
    }

    /// Ask the process to stop, escalating to a forced kill after `grace`.
    ///
    /// Returns an error if the process is still alive after the forced kill
    /// had another `grace` to take effect.
    pub async fn terminate(&mut self, grace: Duration) -> Result<Option<ExitInfo>, WorkerError> {
        if let Ok(Some(exit)) = self.poll_exit() {
            return Ok(Some(exit));
        }

        info!(job = %self.job_id, pid = ?self.pid(), "requesting graceful termination");
        self.signal_graceful();
        if let Some(exit) = self.wait_exit(grace).await {
            return Ok(Some(exit));
        }

        warn!(job = %self.job_id, pid = ?self.pid(), "grace period elapsed; forcing kill");
        self.signal_forced();
        if let Err(e) = self.child.start_kill() {
            debug!(job = %self.job_id, error = %e, "start_kill failed");
        }
        match self.wait_exit(grace).await {
            Some(exit) => Ok(Some(exit)),
            None => Err(WorkerError::Termination {
                job: self.job_id.clone(),
                reason: format!("process still alive {:?} after forced kill", grace),
            }),
        }
    }

    #[cfg(unix)]
    fn signal_graceful(&self) {
        self.signal_group(nix::sys::signal::Signal::SIGTERM);
    }

    #[cfg(unix)]
    fn signal_forced(&self) {
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
    }

    /// Children are spawned as process-group leaders so the whole tree
    /// under the shell receives the signal.
    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        let Some(pid) = self.pid() else { return };
        let pgid = nix::unistd::Pid::from_raw(pid as i32);
        if let Err(e) = nix::sys::signal::killpg(pgid, signal) {
            debug!(job = %self.job_id, error = %e, ?signal, "killpg failed");
        }
    }

    #[cfg(not(unix))]
    fn signal_graceful(&mut self) {
        let _ = self.child.start_kill();
    }

    #[cfg(not(unix))]
    fn signal_forced(&self) {}
}

impl ProcessProbe for RunningHandle {
    fn poll_exit(&mut self) -> std::io::Result<Option<ExitInfo>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        if let Some(status) = self.child.try_wait()? {
            self.exit = Some(status.into());
        }
        Ok(self.exit)
    }
}

/// Spawn `cmd` for `job_id` and wrap it in a [`RunningHandle`].
///
/// With [`LogSource::Stdout`] the process's stdout and stderr are written to
/// `log_path` (truncated first). Otherwise both streams are drained and
/// logged at debug level so pipe buffers never fill.
pub(crate) fn spawn(
    job_id: &str,
    mut cmd: Command,
    log_path: PathBuf,
    log_source: LogSource,
) -> Result<RunningHandle, WorkerError> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    match log_source {
        LogSource::Stdout => {
            if let Some(parent) = log_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&log_path)?;
            let err_file = file.try_clone()?;
            cmd.stdout(Stdio::from(file)).stderr(Stdio::from(err_file));
        }
        LogSource::Process => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| WorkerError::launch(job_id, format!("spawning process: {e}")))?;

    if let Some(stdout) = child.stdout.take() {
        drain_to_debug(job_id.to_string(), "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        drain_to_debug(job_id.to_string(), "stderr", stderr);
    }

    info!(job = %job_id, pid = ?child.id(), log = ?log_path, "process started");

    Ok(RunningHandle {
        job_id: job_id.to_string(),
        child,
        log_path,
        exit: None,
    })
}

fn drain_to_debug<R>(job: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(job = %job, stream, "{}", line);
        }
    });
}
