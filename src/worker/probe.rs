// src/worker/probe.rs

//! Reachability and capability probes used by worker validation.

use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

use crate::errors::WorkerError;

/// Open (and immediately drop) a TCP connection to `host:port`.
pub async fn tcp_reachable(
    worker: &str,
    host: &str,
    port: u16,
    within: Duration,
) -> Result<(), WorkerError> {
    let addr = format!("{host}:{port}");
    match tokio::time::timeout(within, TcpStream::connect(&addr)).await {
        Ok(Ok(_stream)) => {
            debug!(worker, %addr, "tcp probe ok");
            Ok(())
        }
        Ok(Err(e)) => Err(WorkerError::connection(worker, format!("{addr}: {e}"))),
        Err(_) => Err(WorkerError::connection(
            worker,
            format!("{addr}: no answer within {within:?}"),
        )),
    }
}

/// Run a short probe command to completion and return its output.
pub async fn command_output(
    worker: &str,
    mut cmd: Command,
    within: Duration,
) -> Result<Output, WorkerError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = cmd
        .spawn()
        .map_err(|e| WorkerError::configuration(worker, format!("probe could not start: {e}")))?;
    match tokio::time::timeout(within, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(WorkerError::connection(worker, format!("probe failed: {e}"))),
        Err(_) => Err(WorkerError::connection(
            worker,
            format!("probe did not finish within {within:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_probe_reports_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tcp_reachable("w", "127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();

        drop(listener);
        let err = tcp_reachable("w", "127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Connection { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_probe_times_out() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let err = command_output("w", cmd, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not finish"));
    }
}
