// src/engine/control.rs

//! Cross-process cancellation.
//!
//! `jobwave cancel` drops a file named after the job into the batch's cancel
//! directory. The running batch watches that directory and turns every new
//! file into a `RuntimeEvent::CancelRequested`. A request is consumed by
//! deleting its file; whoever deletes it sends the event, so a request seen
//! both by the startup scan and by the watcher is delivered once.

use std::path::{Path, PathBuf};

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::RuntimeEvent;
use crate::errors::{JobwaveError, Result};
use crate::types::JobId;

/// Keeps the underlying `RecommendedWatcher` alive. Dropping this handle
/// stops watching.
pub struct CancelWatcher {
    _inner: RecommendedWatcher,
    dir: PathBuf,
}

impl std::fmt::Debug for CancelWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelWatcher").field("dir", &self.dir).finish()
    }
}

/// Watch `dir` for cancel requests and forward them to `runtime_tx`.
///
/// Requests already present when the watcher starts are delivered too.
pub fn spawn_cancel_watcher(
    dir: impl Into<PathBuf>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> Result<CancelWatcher> {
    let dir = dir.into();
    std::fs::create_dir_all(&dir)?;

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event_tx.send(event).is_err() {
                    debug!("cancel watcher loop is gone; dropping notify event");
                }
            }
            Err(err) => warn!(error = %err, "cancel directory watch error"),
        },
        Config::default(),
    )
    .map_err(|e| JobwaveError::Other(e.into()))?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| JobwaveError::Other(e.into()))?;
    info!(dir = ?dir, "cancel watcher started");

    // Scan after watching so a request filed in between is not lost.
    let existing = existing_requests(&dir);

    tokio::spawn(async move {
        for job in existing {
            if !forward(&runtime_tx, job).await {
                return;
            }
        }

        while let Some(event) = event_rx.recv().await {
            if !matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_)
            ) {
                continue;
            }
            for path in event.paths {
                if let Some(job) = take_request(&path) {
                    if !forward(&runtime_tx, job).await {
                        return;
                    }
                }
            }
        }
        debug!("cancel watcher loop finished");
    });

    Ok(CancelWatcher {
        _inner: watcher,
        dir,
    })
}

async fn forward(runtime_tx: &mpsc::Sender<RuntimeEvent>, job: JobId) -> bool {
    info!(job = %job, "cancel request received");
    runtime_tx
        .send(RuntimeEvent::CancelRequested { job })
        .await
        .is_ok()
}

fn existing_requests(dir: &Path) -> Vec<JobId> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = ?dir, error = %e, "could not scan cancel directory");
            return Vec::new();
        }
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();
    paths.iter().filter_map(|p| take_request(p)).collect()
}

/// Consume the request at `path`, returning its job id.
fn take_request(path: &Path) -> Option<JobId> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') || !path.is_file() {
        return None;
    }
    match std::fs::remove_file(path) {
        Ok(()) => Some(name.to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = ?path, error = %e, "could not consume cancel request");
            None
        }
    }
}
