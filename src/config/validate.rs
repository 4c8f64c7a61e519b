// src/config/validate.rs

use std::collections::HashSet;

use globset::Glob;
use regex::Regex;

use crate::config::duration::parse_duration;
use crate::config::model::{
    BatchConfig, BatchSection, BatchSettings, JobConfig, RawBatchConfig, WorkerConfig,
};
use crate::errors::{JobwaveError, Result};
use crate::job::verify::{HookRegistry, OUTPUT_GLOB_PREFIX};
use crate::types::{SessionMode, TransportKind};

impl TryFrom<RawBatchConfig> for BatchConfig {
    type Error = crate::errors::JobwaveError;

    fn try_from(raw: RawBatchConfig) -> std::result::Result<Self, Self::Error> {
        ensure_not_empty(&raw)?;
        let settings = validate_batch_section(&raw.batch)?;
        for (id, worker) in raw.worker.iter() {
            validate_worker(id, worker)?;
        }
        validate_jobs(&raw.job)?;

        let batch_id = match raw.batch.id {
            Some(id) => {
                check_identifier("batch id", &id)?;
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        Ok(BatchConfig::new_unchecked(
            batch_id, settings, raw.worker, raw.job,
        ))
    }
}

impl BatchConfig {
    /// Check every job's `verify` identifier against the given registry.
    pub fn check_hooks(&self, registry: &HookRegistry) -> Result<()> {
        for job in &self.jobs {
            if let Some(ref hook) = job.verify {
                if !registry.contains(hook) {
                    return Err(config_err(format!(
                        "job '{}' references unknown verification hook '{}'",
                        job.id, hook
                    )));
                }
            }
        }
        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> JobwaveError {
    JobwaveError::ConfigError(msg.into())
}

fn ensure_not_empty(cfg: &RawBatchConfig) -> Result<()> {
    if cfg.worker.is_empty() {
        return Err(config_err(
            "batch must contain at least one [worker.<id>] section",
        ));
    }
    if cfg.job.is_empty() {
        return Err(config_err("batch must contain at least one [[job]] entry"));
    }
    Ok(())
}

fn duration_or(field: &str, value: &Option<String>, default: std::time::Duration) -> Result<std::time::Duration> {
    match value {
        Some(s) => parse_duration(s).map_err(|e| config_err(format!("[batch].{field}: {e}"))),
        None => Ok(default),
    }
}

fn validate_batch_section(section: &BatchSection) -> Result<BatchSettings> {
    let defaults = BatchSettings::default();

    let poll_interval = duration_or("poll_interval", &section.poll_interval, defaults.poll_interval)?;
    if poll_interval.is_zero() {
        return Err(config_err("[batch].poll_interval must be greater than zero"));
    }

    let monitor_timeout = match section.monitor_timeout {
        Some(ref s) => Some(
            parse_duration(s).map_err(|e| config_err(format!("[batch].monitor_timeout: {e}")))?,
        ),
        None => None,
    };

    check_marker("[batch].completion_marker", &section.completion_marker)?;
    check_marker("[batch].failure_marker", &section.failure_marker)?;

    Ok(BatchSettings {
        state_dir: section.state_dir.clone().unwrap_or(defaults.state_dir),
        poll_interval,
        log_grace: duration_or("log_grace", &section.log_grace, defaults.log_grace)?,
        termination_grace: duration_or(
            "termination_grace",
            &section.termination_grace,
            defaults.termination_grace,
        )?,
        exit_grace: duration_or("exit_grace", &section.exit_grace, defaults.exit_grace)?,
        validate_timeout: duration_or(
            "validate_timeout",
            &section.validate_timeout,
            defaults.validate_timeout,
        )?,
        monitor_timeout,
        completion_marker: section.completion_marker.clone(),
        failure_marker: section.failure_marker.clone(),
    })
}

fn check_marker(field: &str, marker: &Option<String>) -> Result<()> {
    if let Some(pattern) = marker {
        Regex::new(pattern)
            .map_err(|e| config_err(format!("{field}: invalid regex '{pattern}': {e}")))?;
    }
    Ok(())
}

/// Ids end up as file names (cancel requests, event logs), so keep them tame.
fn check_identifier(what: &str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(config_err(format!(
            "{what} '{id}' must be non-empty and use only letters, digits, '-', '_' or '.'"
        )));
    }
    Ok(())
}

fn is_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_worker(id: &str, w: &WorkerConfig) -> Result<()> {
    check_identifier("worker id", id)?;

    if w.capacity == 0 {
        return Err(config_err(format!(
            "worker '{id}': capacity must be >= 1 (got 0)"
        )));
    }

    let reject = |option: &str| {
        config_err(format!(
            "worker '{id}': option `{option}` does not apply to transport '{}'",
            w.transport
        ))
    };

    match w.transport {
        TransportKind::Local => {
            if w.host.is_some() {
                return Err(reject("host"));
            }
            if w.credentials_ref.is_some() {
                return Err(reject("credentials_ref"));
            }
            if w.session_mode.is_some() {
                return Err(reject("session_mode"));
            }
            if !w.path_mapping.is_empty() {
                return Err(reject("path_mapping"));
            }
            if w.share_local.is_some() || w.share_remote.is_some() {
                return Err(reject("share_local/share_remote"));
            }
            if w.container.is_some() {
                return Err(reject("container"));
            }
            if w.docker.is_some() {
                return Err(reject("docker"));
            }
            if w.port.is_some() {
                return Err(reject("port"));
            }
            if w.user.is_some() {
                return Err(reject("user"));
            }
            if w.launcher.is_some() {
                return Err(reject("launcher"));
            }
            if w.requires_desktop.is_some() {
                return Err(reject("requires_desktop"));
            }
        }
        TransportKind::RemoteShare => {
            require_host(id, w)?;
            if !w.path_mapping.is_empty() {
                return Err(reject("path_mapping"));
            }
            if w.container.is_some() {
                return Err(reject("container"));
            }
            if w.docker.is_some() {
                return Err(reject("docker"));
            }
            if w.share_local.is_none() || w.share_remote.is_none() {
                return Err(config_err(format!(
                    "worker '{id}': remote_share requires both `share_local` and `share_remote`"
                )));
            }
            if w.effective_requires_desktop()
                && w.effective_session_mode() == SessionMode::Background
            {
                return Err(config_err(format!(
                    "worker '{id}': session_mode = \"background\" cannot host a program that requires a desktop; \
                     use session_mode = \"interactive\" or set requires_desktop = false"
                )));
            }
        }
        TransportKind::ContainerShell => {
            require_host(id, w)?;
            if w.session_mode.is_some() {
                return Err(reject("session_mode"));
            }
            if w.share_local.is_some() || w.share_remote.is_some() {
                return Err(reject("share_local/share_remote"));
            }
            if w.requires_desktop.is_some() {
                return Err(reject("requires_desktop"));
            }
            match w.container {
                Some(ref c) if !c.trim().is_empty() => {}
                _ => {
                    return Err(config_err(format!(
                        "worker '{id}': container_shell requires `container`"
                    )));
                }
            }
            if w.path_mapping.is_empty() {
                return Err(config_err(format!(
                    "worker '{id}': container_shell requires at least one `path_mapping` rule"
                )));
            }
        }
        // Unsupported transports are allowed through config; they are
        // rejected by `validate()` and never enter the pool.
        TransportKind::Other(_) => {}
    }

    if let Some(ref cred) = w.credentials_ref {
        if !is_env_var_name(cred) {
            return Err(config_err(format!(
                "worker '{id}': credentials_ref must name an environment variable, not hold a secret"
            )));
        }
    }

    Ok(())
}

fn require_host(id: &str, w: &WorkerConfig) -> Result<()> {
    match w.host {
        Some(ref h) if !h.trim().is_empty() => Ok(()),
        _ => Err(config_err(format!(
            "worker '{id}': transport '{}' requires `host`",
            w.transport
        ))),
    }
}

fn validate_jobs(jobs: &[JobConfig]) -> Result<()> {
    let mut seen = HashSet::new();

    for job in jobs {
        check_identifier("job id", &job.id)?;
        if !seen.insert(job.id.as_str()) {
            return Err(config_err(format!("duplicate job id '{}'", job.id)));
        }
        if job.cmd.trim().is_empty() {
            return Err(config_err(format!("job '{}': `cmd` must not be empty", job.id)));
        }
        if job.working_dir.as_os_str().is_empty() {
            return Err(config_err(format!(
                "job '{}': `working_dir` must not be empty",
                job.id
            )));
        }
        if job.log.as_os_str().is_empty() {
            return Err(config_err(format!("job '{}': `log` must not be empty", job.id)));
        }
        if let Some(ref t) = job.timeout {
            let d = parse_duration(t)
                .map_err(|e| config_err(format!("job '{}': timeout: {e}", job.id)))?;
            if d.is_zero() {
                return Err(config_err(format!(
                    "job '{}': timeout must be greater than zero",
                    job.id
                )));
            }
        }
        check_marker(&format!("job '{}': completion_marker", job.id), &job.completion_marker)?;
        check_marker(&format!("job '{}': failure_marker", job.id), &job.failure_marker)?;

        if let Some(pattern) = job.verify.as_deref().and_then(|v| v.strip_prefix(OUTPUT_GLOB_PREFIX)) {
            Glob::new(pattern).map_err(|e| {
                config_err(format!("job '{}': invalid output glob '{pattern}': {e}", job.id))
            })?;
        }

        for key in job.env.keys() {
            if !is_env_var_name(key) {
                return Err(config_err(format!(
                    "job '{}': invalid environment variable name '{key}'",
                    job.id
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_str;

    fn parse(toml: &str) -> Result<BatchConfig> {
        BatchConfig::try_from(load_from_str(toml)?)
    }

    const LOCAL_JOB: &str = r#"
[worker.w1]
transport = "local"
capacity = 2

[[job]]
id = "a"
cmd = "echo a"
working_dir = "."
log = "a.log"
"#;

    #[test]
    fn minimal_batch_gets_defaults_and_generated_id() {
        let cfg = parse(LOCAL_JOB).unwrap();
        assert_eq!(cfg.jobs.len(), 1);
        assert_eq!(cfg.settings.poll_interval, std::time::Duration::from_millis(500));
        assert!(uuid::Uuid::parse_str(&cfg.batch_id).is_ok());
    }

    #[test]
    fn background_session_rejected_for_desktop_programs() {
        let toml = r#"
[worker.lab]
transport = "remote_share"
host = "lab-01"
session_mode = "background"
share_local = "/mnt/jobs"
share_remote = "D:\\jobs"

[[job]]
id = "a"
cmd = "solver"
working_dir = "/mnt/jobs/a"
log = "/mnt/jobs/a/run.log"
"#;
        match parse(toml) {
            Err(JobwaveError::ConfigError(msg)) => assert!(msg.contains("background")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn inline_secret_in_credentials_ref_rejected() {
        let toml = r#"
[worker.box]
transport = "container_shell"
host = "build-02"
container = "solver"
credentials_ref = "hunter2!"
path_mapping = [{ host = "/srv", container = "/work" }]

[[job]]
id = "a"
cmd = "solver"
working_dir = "/srv/a"
log = "/srv/a/run.log"
"#;
        assert!(matches!(parse(toml), Err(JobwaveError::ConfigError(_))));
    }

    #[test]
    fn duplicate_job_ids_rejected() {
        let toml = format!(
            "{LOCAL_JOB}\n[[job]]\nid = \"a\"\ncmd = \"echo again\"\nworking_dir = \".\"\nlog = \"b.log\"\n"
        );
        match parse(&toml) {
            Err(JobwaveError::ConfigError(msg)) => assert!(msg.contains("duplicate")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn options_foreign_to_transport_rejected() {
        let toml = LOCAL_JOB.replace("capacity = 2", "capacity = 2\nhost = \"x\"");
        assert!(matches!(parse(&toml), Err(JobwaveError::ConfigError(_))));
    }

    #[test]
    fn unsupported_transport_passes_config_validation() {
        let toml = LOCAL_JOB.replace("transport = \"local\"", "transport = \"kubernetes\"");
        let cfg = parse(&toml).unwrap();
        assert_eq!(
            cfg.workers["w1"].transport,
            TransportKind::Other("kubernetes".into())
        );
    }
}
