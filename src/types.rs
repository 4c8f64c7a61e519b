use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a job, unique within a batch.
pub type JobId = String;

/// Identifier of a worker, unique within a pool.
pub type WorkerId = String;

/// Which transport a worker uses to run commands.
///
/// Unknown names are kept as `Other` so that configuration can name a
/// transport that has no implementation yet; such workers always fail
/// validation and never enter the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransportKind {
    Local,
    RemoteShare,
    ContainerShell,
    Other(String),
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "" => Err("transport must not be empty".to_string()),
            "local" => Ok(TransportKind::Local),
            "remote_share" => Ok(TransportKind::RemoteShare),
            "container_shell" => Ok(TransportKind::ContainerShell),
            other => Ok(TransportKind::Other(other.to_string())),
        }
    }
}

impl TryFrom<String> for TransportKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TransportKind> for String {
    fn from(kind: TransportKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Local => write!(f, "local"),
            TransportKind::RemoteShare => write!(f, "remote_share"),
            TransportKind::ContainerShell => write!(f, "container_shell"),
            TransportKind::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Session the remote process is started in.
///
/// - `Interactive`: a session able to host a full desktop/GUI program.
/// - `Background`: a non-interactive service context. Invalid for workers
///   whose target program requires a desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Interactive,
    Background,
}

impl Default for SessionMode {
    fn default() -> Self {
        SessionMode::Interactive
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "interactive" => Ok(SessionMode::Interactive),
            "background" => Ok(SessionMode::Background),
            other => Err(format!(
                "invalid session_mode: {other} (expected \"interactive\" or \"background\")"
            )),
        }
    }
}

/// Who writes the job's log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// The target program writes `log` itself.
    Process,
    /// The worker redirects the process's stdout/stderr into `log`.
    Stdout,
}

impl Default for LogSource {
    fn default() -> Self {
        LogSource::Process
    }
}

/// Why the scheduler asked a running job to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    TimedOut,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::TimedOut => write!(f, "timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_parses_known_and_unknown_names() {
        assert_eq!("local".parse::<TransportKind>(), Ok(TransportKind::Local));
        assert_eq!(
            "Remote-Share".parse::<TransportKind>(),
            Ok(TransportKind::RemoteShare)
        );
        assert_eq!(
            "kubernetes".parse::<TransportKind>(),
            Ok(TransportKind::Other("kubernetes".to_string()))
        );
        assert!("  ".parse::<TransportKind>().is_err());
    }

    #[test]
    fn session_mode_rejects_unknown_values() {
        assert_eq!("background".parse::<SessionMode>(), Ok(SessionMode::Background));
        assert!("service".parse::<SessionMode>().is_err());
    }
}
