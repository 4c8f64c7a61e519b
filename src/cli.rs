// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::model::DEFAULT_STATE_DIR;

/// Command-line arguments for `jobwave`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobwave",
    version,
    about = "Run batches of long-running jobs across a pool of workers.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBWAVE_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run every job of a batch file and write its report.
    ///
    /// Exit code 0 when every job succeeded, 1 when some did not, 2 when the
    /// batch could not start.
    Submit {
        /// Path to the batch file (TOML).
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Parse + validate, print workers and jobs, but don't run anything.
        #[arg(long)]
        dry_run: bool,

        /// Observers to attach; may be repeated.
        #[arg(long = "observer", value_enum, value_name = "KIND", default_value = "progress")]
        observers: Vec<ObserverKind>,
    },

    /// Show the report of a finished batch, or the latest snapshot of a
    /// running one.
    Status {
        #[arg(value_name = "BATCH_ID")]
        batch_id: String,

        #[arg(long, value_name = "DIR", default_value = DEFAULT_STATE_DIR)]
        state_dir: PathBuf,
    },

    /// Ask a running batch to cancel one of its jobs.
    Cancel {
        #[arg(value_name = "JOB_ID")]
        job_id: String,

        /// Batch the job belongs to.
        #[arg(long, value_name = "BATCH_ID")]
        batch: String,

        #[arg(long, value_name = "DIR", default_value = DEFAULT_STATE_DIR)]
        state_dir: PathBuf,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Stock observers selectable with `--observer`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ObserverKind {
    Silent,
    Console,
    Progress,
    JobLog,
}

/// Process exit status of the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliExit {
    /// Every job succeeded and passed verification.
    Success,
    /// The batch ran but some job did not succeed.
    JobsFailed,
    /// Configuration or validation error; nothing (more) could run.
    SetupFailed,
}

impl CliExit {
    pub fn code(self) -> i32 {
        match self {
            CliExit::Success => 0,
            CliExit::JobsFailed => 1,
            CliExit::SetupFailed => 2,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_defaults_to_progress_observer() {
        let args = CliArgs::try_parse_from(["jobwave", "submit", "batch.toml"]).unwrap();
        match args.command {
            Command::Submit {
                config,
                dry_run,
                observers,
            } => {
                assert_eq!(config, PathBuf::from("batch.toml"));
                assert!(!dry_run);
                assert_eq!(observers, vec![ObserverKind::Progress]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cancel_requires_batch_and_accepts_global_log_level() {
        assert!(CliArgs::try_parse_from(["jobwave", "cancel", "job-1"]).is_err());
        let args = CliArgs::try_parse_from([
            "jobwave", "cancel", "job-1", "--batch", "nightly", "--log-level", "debug",
        ])
        .unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(matches!(args.command, Command::Cancel { ref batch, .. } if batch == "nightly"));
    }

    #[test]
    fn observers_can_be_repeated() {
        let args = CliArgs::try_parse_from([
            "jobwave", "submit", "b.toml", "--observer", "console", "--observer", "job-log",
        ])
        .unwrap();
        let Command::Submit { observers, .. } = args.command else {
            panic!("expected submit");
        };
        assert_eq!(observers, vec![ObserverKind::Console, ObserverKind::JobLog]);
    }
}
