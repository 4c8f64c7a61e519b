#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use jobwave::config::{BatchConfig, BatchSection, JobConfig, RawBatchConfig, WorkerConfig};
use jobwave::types::{LogSource, SessionMode, TransportKind};
use jobwave::worker::path_map::PathMapping;

/// Builder for `BatchConfig` to simplify test setup.
pub struct BatchConfigBuilder {
    config: RawBatchConfig,
}

impl BatchConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawBatchConfig {
                batch: BatchSection::default(),
                worker: BTreeMap::new(),
                job: Vec::new(),
            },
        }
    }

    pub fn batch_id(mut self, id: &str) -> Self {
        self.config.batch.id = Some(id.to_string());
        self
    }

    pub fn state_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.batch.state_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Short timings so tests finish quickly.
    pub fn fast_timings(mut self) -> Self {
        self.config.batch.poll_interval = Some("20ms".to_string());
        self.config.batch.log_grace = Some("2s".to_string());
        self.config.batch.termination_grace = Some("500ms".to_string());
        self.config.batch.exit_grace = Some("500ms".to_string());
        self.config.batch.validate_timeout = Some("2s".to_string());
        self
    }

    pub fn completion_marker(mut self, regex: &str) -> Self {
        self.config.batch.completion_marker = Some(regex.to_string());
        self
    }

    pub fn with_worker(mut self, id: &str, worker: WorkerConfig) -> Self {
        self.config.worker.insert(id.to_string(), worker);
        self
    }

    pub fn with_job(mut self, job: JobConfig) -> Self {
        self.config.job.push(job);
        self
    }

    pub fn build_raw(self) -> RawBatchConfig {
        self.config
    }

    pub fn build(self) -> BatchConfig {
        BatchConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for BatchConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
///
/// `new` places the job under `dir`: working directory `dir`, log
/// `dir/<id>.log`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(id: &str, cmd: &str, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            job: JobConfig::new(id, cmd, dir, dir.join(format!("{id}.log"))),
        }
    }

    pub fn log(mut self, path: impl Into<PathBuf>) -> Self {
        self.job.log = path.into();
        self
    }

    /// The worker writes the process's stdout/stderr into the log.
    pub fn stdout_log(mut self) -> Self {
        self.job.log_source = LogSource::Stdout;
        self
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.job.inputs.push(path.into());
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.job.output = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.job.timeout = Some(timeout.to_string());
        self
    }

    pub fn verify(mut self, hook: &str) -> Self {
        self.job.verify = Some(hook.to_string());
        self
    }

    pub fn completion_marker(mut self, regex: &str) -> Self {
        self.job.completion_marker = Some(regex.to_string());
        self
    }

    pub fn failure_marker(mut self, regex: &str) -> Self {
        self.job.failure_marker = Some(regex.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.job.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

/// Builder for `WorkerConfig`.
pub struct WorkerConfigBuilder {
    worker: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn local(capacity: usize) -> Self {
        Self::new(TransportKind::Local).capacity(capacity)
    }

    pub fn remote_share(host: &str, share_local: impl AsRef<Path>, share_remote: &str) -> Self {
        let mut b = Self::new(TransportKind::RemoteShare).host(host);
        b.worker.share_local = Some(share_local.as_ref().to_path_buf());
        b.worker.share_remote = Some(share_remote.to_string());
        b
    }

    pub fn container_shell(host: &str, container: &str) -> Self {
        let mut b = Self::new(TransportKind::ContainerShell).host(host);
        b.worker.container = Some(container.to_string());
        b
    }

    pub fn new(transport: TransportKind) -> Self {
        Self {
            worker: WorkerConfig::new(transport),
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.worker.capacity = capacity;
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.worker.host = Some(host.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.worker.port = Some(port);
        self
    }

    pub fn credentials_ref(mut self, var: &str) -> Self {
        self.worker.credentials_ref = Some(var.to_string());
        self
    }

    pub fn session_mode(mut self, mode: SessionMode) -> Self {
        self.worker.session_mode = Some(mode);
        self
    }

    pub fn requires_desktop(mut self, val: bool) -> Self {
        self.worker.requires_desktop = Some(val);
        self
    }

    pub fn path_mapping(mut self, host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        self.worker.path_mapping.push(PathMapping::new(host, container));
        self
    }

    pub fn build(self) -> WorkerConfig {
        self.worker
    }
}
