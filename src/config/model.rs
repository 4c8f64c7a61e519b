// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{LogSource, SessionMode, TransportKind};
use crate::worker::path_map::PathMapping;

/// Top-level batch description as read from a TOML file.
///
/// ```toml
/// [batch]
/// id = "nightly"
///
/// [worker.local]
/// transport = "local"
/// capacity = 2
///
/// [[job]]
/// id = "case-1"
/// cmd = "solver --input {input} --log {log}"
/// working_dir = "cases/1"
/// log = "cases/1/run.log"
/// ```
///
/// This is the *unvalidated* form; convert it with `BatchConfig::try_from`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBatchConfig {
    #[serde(default)]
    pub batch: BatchSection,

    /// Workers keyed by id (`[worker.<id>]`).
    #[serde(default)]
    pub worker: BTreeMap<String, WorkerConfig>,

    /// Jobs in submission order (`[[job]]`).
    #[serde(default)]
    pub job: Vec<JobConfig>,
}

/// `[batch]` section. Every field is optional.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BatchSection {
    /// Batch identifier; a UUID is generated when absent.
    #[serde(default)]
    pub id: Option<String>,

    /// Directory for reports, status snapshots and cancel requests.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub poll_interval: Option<String>,

    #[serde(default)]
    pub log_grace: Option<String>,

    #[serde(default)]
    pub termination_grace: Option<String>,

    #[serde(default)]
    pub exit_grace: Option<String>,

    #[serde(default)]
    pub validate_timeout: Option<String>,

    #[serde(default)]
    pub monitor_timeout: Option<String>,

    /// Default success marker (regex) for jobs that set none.
    #[serde(default)]
    pub completion_marker: Option<String>,

    /// Default failure marker (regex) for jobs that set none.
    #[serde(default)]
    pub failure_marker: Option<String>,
}

/// `[worker.<id>]` section.
///
/// Options are flat; which ones are allowed depends on `transport` and is
/// enforced during validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub transport: TransportKind,

    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: Option<String>,

    /// Name of an environment variable holding an identity-file path.
    #[serde(default)]
    pub credentials_ref: Option<String>,

    /// Client program and leading arguments (default `["ssh"]`).
    #[serde(default)]
    pub launcher: Option<Vec<String>>,

    #[serde(default)]
    pub session_mode: Option<SessionMode>,

    /// Whether the launched program needs a desktop session.
    #[serde(default)]
    pub requires_desktop: Option<bool>,

    /// Local mount point of the shared network path.
    #[serde(default)]
    pub share_local: Option<PathBuf>,

    /// The same share as seen from the remote host.
    #[serde(default)]
    pub share_remote: Option<String>,

    #[serde(default)]
    pub container: Option<String>,

    #[serde(default)]
    pub docker: Option<String>,

    #[serde(default)]
    pub path_mapping: Vec<PathMapping>,
}

fn default_capacity() -> usize {
    1
}

impl WorkerConfig {
    /// A worker of the given transport with capacity 1 and no options set.
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            capacity: default_capacity(),
            host: None,
            port: None,
            user: None,
            credentials_ref: None,
            launcher: None,
            session_mode: None,
            requires_desktop: None,
            share_local: None,
            share_remote: None,
            container: None,
            docker: None,
            path_mapping: Vec::new(),
        }
    }

    pub fn effective_session_mode(&self) -> SessionMode {
        self.session_mode.unwrap_or_default()
    }

    /// Remote-share workers assume a desktop program unless told otherwise.
    pub fn effective_requires_desktop(&self) -> bool {
        self.requires_desktop.unwrap_or(true)
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(22)
    }

    pub fn effective_launcher(&self) -> Vec<String> {
        match &self.launcher {
            Some(l) if !l.is_empty() => l.clone(),
            _ => vec!["ssh".to_string()],
        }
    }
}

/// `[[job]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub id: String,

    /// Command template, run through the worker's shell.
    pub cmd: String,

    pub working_dir: PathBuf,

    #[serde(default)]
    pub inputs: Vec<PathBuf>,

    /// Expected output artifact, used by verification hooks.
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Log file the monitor tails.
    pub log: PathBuf,

    #[serde(default)]
    pub log_source: LogSource,

    /// Maximum running time, e.g. `"2h"`.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Verification hook identifier.
    #[serde(default)]
    pub verify: Option<String>,

    #[serde(default)]
    pub completion_marker: Option<String>,

    #[serde(default)]
    pub failure_marker: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl JobConfig {
    pub fn new(id: impl Into<String>, cmd: impl Into<String>, working_dir: impl Into<PathBuf>, log: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            cmd: cmd.into(),
            working_dir: working_dir.into(),
            inputs: Vec::new(),
            output: None,
            log: log.into(),
            log_source: LogSource::default(),
            timeout: None,
            verify: None,
            completion_marker: None,
            failure_marker: None,
            env: BTreeMap::new(),
        }
    }
}

/// Batch-wide settings with defaults applied and durations parsed.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub state_dir: PathBuf,
    pub poll_interval: Duration,
    pub log_grace: Duration,
    pub termination_grace: Duration,
    pub exit_grace: Duration,
    pub validate_timeout: Duration,
    pub monitor_timeout: Option<Duration>,
    pub completion_marker: Option<String>,
    pub failure_marker: Option<String>,
}

pub const DEFAULT_STATE_DIR: &str = ".jobwave";

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            poll_interval: Duration::from_millis(500),
            log_grace: Duration::from_secs(30),
            termination_grace: Duration::from_secs(5),
            exit_grace: Duration::from_secs(5),
            validate_timeout: Duration::from_secs(10),
            monitor_timeout: None,
            completion_marker: None,
            failure_marker: None,
        }
    }
}

/// Validated batch configuration.
///
/// Only constructed through `TryFrom<RawBatchConfig>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_id: String,
    pub settings: BatchSettings,
    pub workers: BTreeMap<String, WorkerConfig>,
    pub jobs: Vec<JobConfig>,
}

impl BatchConfig {
    pub(crate) fn new_unchecked(
        batch_id: String,
        settings: BatchSettings,
        workers: BTreeMap<String, WorkerConfig>,
        jobs: Vec<JobConfig>,
    ) -> Self {
        Self {
            batch_id,
            settings,
            workers,
            jobs,
        }
    }
}
