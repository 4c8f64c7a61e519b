// src/worker/container_shell.rs

//! `docker exec` into a running container on a host reached over ssh.
//!
//! Paths are translated with the worker's path mappings. The orchestrator
//! monitors the host-side log path, so every mapped host root must be
//! readable locally (the same machine, or a shared mount at the same
//! location). `validate` refuses the worker otherwise.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::handle::{self, RunningHandle};
use super::path_map::PathMap;
use super::probe::{command_output, tcp_reachable};
use super::ssh::SshTarget;
use super::{BoxFuture, PreparedJob, Slots, Worker};
use crate::config::WorkerConfig;
use crate::errors::WorkerError;
use crate::job::{shell_quote, template, Job, TemplateVars};
use crate::types::TransportKind;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct ContainerShellWorker {
    id: String,
    slots: Arc<Slots>,
    ssh: SshTarget,
    container: String,
    docker: String,
    paths: PathMap,
}

impl ContainerShellWorker {
    pub fn from_config(id: &str, cfg: &WorkerConfig) -> Self {
        Self {
            id: id.to_string(),
            slots: Arc::new(Slots::new(cfg.capacity)),
            ssh: SshTarget::from_config(id, cfg, false),
            container: cfg.container.clone().unwrap_or_default(),
            docker: cfg.docker.clone().unwrap_or_else(|| "docker".to_string()),
            paths: PathMap::new(cfg.path_mapping.clone()),
        }
    }

    fn in_container(&self, job: &Job, path: &Path, what: &str) -> Result<String, WorkerError> {
        self.paths
            .to_container(path)
            .map(|p| p.to_string_lossy().into_owned())
            .ok_or_else(|| {
                WorkerError::launch(
                    &job.id,
                    format!("{what} {:?} is not covered by any path mapping", path),
                )
            })
    }

    /// `docker exec -w <cwd> -e K=V <container> sh -c '<cmd>'`
    fn exec_line(&self, prepared: &PreparedJob) -> String {
        let mut line = format!(
            "{} exec -w {}",
            shell_quote(&self.docker),
            shell_quote(&prepared.working_dir)
        );
        for (k, v) in &prepared.env {
            line.push_str(" -e ");
            line.push_str(&shell_quote(&format!("{k}={v}")));
        }
        line.push(' ');
        line.push_str(&shell_quote(&self.container));
        line.push_str(" sh -c ");
        line.push_str(&shell_quote(&prepared.command_line));
        line
    }
}

impl Worker for ContainerShellWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn transport(&self) -> TransportKind {
        TransportKind::ContainerShell
    }

    fn slots(&self) -> &Arc<Slots> {
        &self.slots
    }

    fn validate(&self) -> BoxFuture<'_, Result<(), WorkerError>> {
        Box::pin(async move {
            // The monitor tails logs at their host paths from this machine.
            for root in self.paths.host_roots() {
                match tokio::fs::metadata(root).await {
                    Ok(m) if m.is_dir() => {}
                    _ => {
                        return Err(WorkerError::configuration(
                            &self.id,
                            format!(
                                "mapped host path {:?} is not an accessible directory here; \
                                 logs under it could not be monitored",
                                root
                            ),
                        ));
                    }
                }
            }
            tcp_reachable(&self.id, self.ssh.host(), self.ssh.port(), PROBE_TIMEOUT).await?;

            let inspect = format!(
                "{} inspect -f '{{{{.State.Running}}}}' {}",
                shell_quote(&self.docker),
                shell_quote(&self.container)
            );
            let output = command_output(&self.id, self.ssh.command(&inspect)?, PROBE_TIMEOUT).await?;
            let running = String::from_utf8_lossy(&output.stdout).trim() == "true";
            if !output.status.success() || !running {
                return Err(WorkerError::connection(
                    &self.id,
                    format!("container '{}' is not running", self.container),
                ));
            }
            info!(worker = %self.id, container = %self.container, "container worker validated");
            Ok(())
        })
    }

    fn prepare<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<PreparedJob, WorkerError>> {
        Box::pin(async move {
            let workdir = self.in_container(job, &job.command.working_dir, "working directory")?;
            let log = self.in_container(job, &job.log_path, "log")?;
            let output = match &job.output {
                Some(out) => Some(self.in_container(job, out, "output")?),
                None => None,
            };
            let inputs = job
                .inputs
                .iter()
                .map(|p| self.in_container(job, p, "input"))
                .collect::<Result<Vec<_>, _>>()?;

            let vars = TemplateVars {
                job: job.id.clone(),
                workdir: workdir.clone(),
                log,
                output,
                inputs,
            };

            Ok(PreparedJob {
                job_id: job.id.clone(),
                command_line: template::render(&job.command.template, &vars),
                working_dir: workdir,
                env: job.command.env.clone(),
                log_path: job.log_path.clone(),
                log_source: job.log_source,
            })
        })
    }

    fn start(&self, prepared: PreparedJob) -> BoxFuture<'_, Result<RunningHandle, WorkerError>> {
        Box::pin(async move {
            let cmd = self.ssh.command(&self.exec_line(&prepared))?;
            handle::spawn(
                &prepared.job_id,
                cmd,
                prepared.log_path,
                prepared.log_source,
            )
        })
    }
}
