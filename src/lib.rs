// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod fs;
pub mod job;
pub mod logging;
pub mod monitor;
pub mod report;
pub mod types;
pub mod worker;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::{CliArgs, CliExit, Command, ObserverKind};
use crate::config::{load_and_validate, BatchConfig};
use crate::engine::control::spawn_cancel_watcher;
use crate::engine::{CoreScheduler, Runtime, RuntimeEvent};
use crate::errors::{JobwaveError, Result};
use crate::events::observers::{ConsoleObserver, JobLogObserver, ProgressObserver, SilentObserver};
use crate::events::{Dispatcher, Observer, Synchronized};
use crate::exec::{RunnerSettings, WorkerExecutor};
use crate::fs::RealFileSystem;
use crate::job::verify::HookRegistry;
use crate::job::Job;
use crate::report::{aggregate, BatchReport, BatchStore, StatusSnapshot, StoredStatus};
use crate::worker::{worker_from_config, WorkerPool};

/// How long observers get to drain their queues after the batch.
const OBSERVER_DRAIN: Duration = Duration::from_secs(5);

/// High-level entry point used by `main.rs`.
///
/// Errors are printed here; the returned value is the process exit status.
pub async fn run(args: CliArgs) -> CliExit {
    let result = match args.command {
        Command::Submit {
            config,
            dry_run,
            observers,
        } => submit(&config, dry_run, &observers).await,
        Command::Status {
            batch_id,
            state_dir,
        } => status(&state_dir, &batch_id),
        Command::Cancel {
            job_id,
            batch,
            state_dir,
        } => cancel(&state_dir, &batch, &job_id),
    };

    match result {
        Ok(exit) => exit,
        Err(err) => {
            eprintln!("jobwave error: {err}");
            CliExit::SetupFailed
        }
    }
}

async fn submit(config_path: &Path, dry_run: bool, kinds: &[ObserverKind]) -> Result<CliExit> {
    let cfg = load_and_validate(config_path)?;
    let hooks = HookRegistry::with_builtins();
    cfg.check_hooks(&hooks)?;

    if dry_run {
        print_dry_run(&cfg);
        return Ok(CliExit::Success);
    }

    let observers = build_observers(&cfg, kinds);
    let report = submit_batch(&cfg, &hooks, observers).await?;
    print_summary(&report);

    Ok(if report.fully_successful() {
        CliExit::Success
    } else {
        CliExit::JobsFailed
    })
}

fn build_observers(cfg: &BatchConfig, kinds: &[ObserverKind]) -> Vec<Arc<dyn Observer>> {
    let store = BatchStore::new(&cfg.settings.state_dir, &cfg.batch_id);
    kinds
        .iter()
        .map(|kind| -> Arc<dyn Observer> {
            match kind {
                ObserverKind::Silent => Arc::new(SilentObserver),
                ObserverKind::Console => Arc::new(ConsoleObserver::new(true)),
                ObserverKind::Progress => {
                    Arc::new(Synchronized::new(ProgressObserver::new(cfg.jobs.len())))
                }
                ObserverKind::JobLog => {
                    Arc::new(Synchronized::new(JobLogObserver::new(store.events_dir())))
                }
            }
        })
        .collect()
}

/// Validate the configured workers, then run the batch on those that
/// passed.
///
/// Workers that fail validation are excluded with a warning. If none is
/// left the batch cannot start and a configuration error is returned.
pub async fn submit_batch(
    cfg: &BatchConfig,
    hooks: &HookRegistry,
    observers: Vec<Arc<dyn Observer>>,
) -> Result<BatchReport> {
    let candidates = cfg
        .workers
        .iter()
        .map(|(id, wcfg)| worker_from_config(id, wcfg))
        .collect();
    let pool = WorkerPool::build(candidates, cfg.settings.validate_timeout).await;

    if pool.is_empty() {
        let reasons: Vec<String> = pool
            .excluded()
            .iter()
            .map(|w| format!("{}: {}", w.id, w.reason))
            .collect();
        return Err(JobwaveError::ConfigError(format!(
            "no usable worker ({})",
            reasons.join("; ")
        )));
    }

    run_batch(cfg, pool, hooks, observers).await
}

/// Run every job of `cfg` on an already validated pool and return the
/// report. This is the library entry point.
///
/// - Jobs are dispatched in submission order as capacity frees up.
/// - Cancel requests filed under the batch's state directory and Ctrl-C are
///   honoured.
/// - `status.json` is kept current while the batch runs and `report.json`
///   is written at the end.
pub async fn run_batch(
    cfg: &BatchConfig,
    pool: WorkerPool,
    hooks: &HookRegistry,
    observers: Vec<Arc<dyn Observer>>,
) -> Result<BatchReport> {
    let settings = &cfg.settings;
    let jobs = cfg
        .jobs
        .iter()
        .map(|j| Job::from_config(j, settings))
        .collect::<Result<Vec<_>>>()?;

    let store = BatchStore::new(&settings.state_dir, &cfg.batch_id);
    store.create()?;
    store.write_snapshot(&StatusSnapshot::capture(&cfg.batch_id, &jobs))?;
    info!(
        batch = %cfg.batch_id,
        jobs = jobs.len(),
        workers = pool.workers().len(),
        capacity = pool.total_capacity(),
        "starting batch"
    );

    let dispatcher = Dispatcher::new(observers);
    let emitter = dispatcher.emitter();

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);

    // Cross-process cancel requests; the batch still runs without them.
    let _cancel_watcher = match spawn_cancel_watcher(store.cancel_dir(), rt_tx.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(error = %e, "cancel requests will not be honoured");
            None
        }
    };

    // Ctrl-C → cancel everything, still produce a report.
    let interrupt = {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            warn!("interrupted; cancelling all jobs");
            let _ = tx.send(RuntimeEvent::CancelAll).await;
        })
    };

    let executor = WorkerExecutor::new(
        &pool,
        rt_tx.clone(),
        emitter.clone(),
        RunnerSettings {
            monitor: settings.into(),
            termination_grace: settings.termination_grace,
        },
    );
    let core = CoreScheduler::new(pool.slot_table(), settings.termination_grace);
    let runtime = Runtime::new(core, rt_rx, rt_tx, executor).with_snapshots(store.clone());

    let outcome = runtime.run(jobs).await;
    interrupt.abort();
    let jobs = outcome?;

    let report = aggregate(
        &cfg.batch_id,
        &jobs,
        hooks,
        &RealFileSystem,
        &emitter,
        pool.excluded(),
    );
    drop(emitter);
    dispatcher.finish(OBSERVER_DRAIN).await;

    store.write_report(&report)?;
    Ok(report)
}

fn status(state_dir: &Path, batch_id: &str) -> Result<CliExit> {
    let store = BatchStore::open(state_dir, batch_id)?;
    match store.read_status()? {
        StoredStatus::Final(report) => {
            print_summary(&report);
            Ok(if report.fully_successful() {
                CliExit::Success
            } else {
                CliExit::JobsFailed
            })
        }
        StoredStatus::InFlight(snapshot) => {
            println!(
                "batch {} in progress (as of {})",
                snapshot.batch_id,
                snapshot.updated_at.to_rfc3339()
            );
            for job in &snapshot.jobs {
                println!(
                    "  {:<24} {:<10} {}",
                    job.id,
                    job.status.to_string(),
                    job.worker.as_deref().unwrap_or("-")
                );
            }
            Ok(CliExit::Success)
        }
    }
}

fn cancel(state_dir: &Path, batch_id: &str, job_id: &str) -> Result<CliExit> {
    let store = BatchStore::open(state_dir, batch_id)?;
    match store.read_status() {
        Ok(StoredStatus::Final(_)) => {
            return Err(JobwaveError::ConfigError(format!(
                "batch {batch_id} already finished; nothing to cancel"
            )));
        }
        Ok(StoredStatus::InFlight(snapshot)) if snapshot.job(job_id).is_none() => {
            return Err(JobwaveError::JobNotFound(format!(
                "{job_id} in batch {batch_id}"
            )));
        }
        // No snapshot yet: nothing has settled, the request is still valid.
        _ => {}
    }
    let path = store.request_cancel(job_id)?;
    println!("cancel requested for {job_id} ({})", path.display());
    Ok(CliExit::Success)
}

fn print_summary(report: &BatchReport) {
    let c = &report.counts;
    println!(
        "batch {}: {} jobs, {} succeeded, {} failed, {} timed out, {} cancelled",
        report.batch_id,
        report.jobs.len(),
        c.succeeded,
        c.failed,
        c.timed_out,
        c.cancelled
    );
    for job in &report.jobs {
        let duration = job
            .duration_ms
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        let verification = match &job.verification {
            Some(v) if v.verified => " verified",
            Some(_) => " verification-rejected",
            None => "",
        };
        println!(
            "  {:<24} {:<10} {:>8}{}",
            job.id,
            job.status.to_string(),
            duration,
            verification
        );
        if let Some(error) = &job.error {
            println!("      {error}");
        }
    }
    for w in &report.excluded_workers {
        println!("  excluded worker {} ({}): {}", w.id, w.transport, w.reason);
    }
}

/// Dry-run output: print workers and jobs.
fn print_dry_run(cfg: &BatchConfig) {
    println!("jobwave dry-run: batch {}", cfg.batch_id);
    println!("  state_dir = {}", cfg.settings.state_dir.display());
    println!();

    println!("workers ({}):", cfg.workers.len());
    for (id, w) in &cfg.workers {
        println!("  - {id} ({}, capacity {})", w.transport, w.capacity);
        if let Some(ref host) = w.host {
            println!("      host: {host}");
        }
    }
    println!();

    println!("jobs ({}):", cfg.jobs.len());
    for job in &cfg.jobs {
        println!("  - {}", job.id);
        println!("      cmd: {}", job.cmd);
        println!("      working_dir: {}", job.working_dir.display());
        println!("      log: {}", job.log.display());
        if let Some(ref t) = job.timeout {
            println!("      timeout: {t}");
        }
        if let Some(ref v) = job.verify {
            println!("      verify: {v}");
        }
    }
}
