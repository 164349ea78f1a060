//! Checkpoint watcher: hot-reloads the snapshot when the checkpoint changes.
//!
//! The watch is placed on the checkpoint's parent directory, not the file,
//! so writers that replace the file by rename (or delete and recreate it)
//! stay observed. Events for other files in that directory are ignored.
//!
//! Any relevant event means "re-read the checkpoint". Nothing about the event
//! itself is trusted: a burst of events collapses into a single re-check.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error_handling::{EngineEvent, EngineStats, WatchError};
use crate::geoip::SnapshotStore;
use crate::ledger::VersionLedger;
use crate::writer::PublishLock;

/// What a re-check of the checkpoint did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecheckOutcome {
    /// Checkpoint matches the active snapshot.
    Unchanged,
    /// The store now serves this version.
    Swapped(String),
    /// The checkpoint was missing and has been rewritten from the store.
    Recreated(String),
    /// Decoding the new version failed; the old snapshot keeps serving.
    SwapFailed(String),
    /// The store closed before the decoded version could be installed.
    Discarded(String),
    /// The checkpoint could not be read.
    ReadFailed,
}

/// Compares the checkpoint with the store and reconciles them.
pub(crate) struct CheckpointReconciler {
    store: Arc<SnapshotStore>,
    ledger: Arc<VersionLedger>,
    database_path: PathBuf,
    lock: PublishLock,
    stats: Arc<EngineStats>,
}

impl CheckpointReconciler {
    pub(crate) fn new(
        store: Arc<SnapshotStore>,
        ledger: Arc<VersionLedger>,
        database_path: PathBuf,
        lock: PublishLock,
        stats: Arc<EngineStats>,
    ) -> Self {
        CheckpointReconciler {
            store,
            ledger,
            database_path,
            lock,
            stats,
        }
    }

    pub(crate) async fn recheck(&self) -> RecheckOutcome {
        let _guard = self.lock.acquire().await;
        let checkpoint = match self.ledger.try_get_version().await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                log::error!("Failed to read checkpoint: {e}");
                self.stats.increment(EngineEvent::WatcherError);
                return RecheckOutcome::ReadFailed;
            }
        };

        let current = self.store.version();
        let Some(checkpoint) = checkpoint else {
            log::warn!(
                "Checkpoint {} was removed; recreating it at version {current:?}",
                self.ledger.version_file().display()
            );
            if let Err(e) = self.ledger.set_version(&current).await {
                log::error!("Failed to recreate checkpoint: {e}");
                self.stats.increment(EngineEvent::WatcherError);
                return RecheckOutcome::ReadFailed;
            }
            self.stats.increment(EngineEvent::CheckpointRecreated);
            return RecheckOutcome::Recreated(current);
        };

        if checkpoint == current || self.store.is_closed() {
            return RecheckOutcome::Unchanged;
        }

        log::info!("Checkpoint moved {current:?} -> {checkpoint:?}; reloading database");
        match self.store.swap(&self.database_path, &checkpoint).await {
            Ok(true) => RecheckOutcome::Swapped(checkpoint),
            Ok(false) => RecheckOutcome::Discarded(checkpoint),
            Err(e) => {
                log::error!(
                    "Failed to load database {} at version {checkpoint:?}: {e}",
                    self.database_path.display()
                );
                RecheckOutcome::SwapFailed(checkpoint)
            }
        }
    }
}

/// Background task that keeps the store in step with the checkpoint.
pub struct ReloadWatcher {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReloadWatcher {
    /// Installs the filesystem watch and spawns the watcher task.
    ///
    /// `lock` must be the publish lock of any writer in this process that
    /// targets the same database. Must be called from within a tokio runtime.
    pub fn start(
        store: Arc<SnapshotStore>,
        ledger: Arc<VersionLedger>,
        database_path: PathBuf,
        lock: PublishLock,
        stats: Arc<EngineStats>,
    ) -> Result<Self, WatchError> {
        let version_file = ledger.version_file().to_path_buf();
        let (dir, file_name) = split(&version_file)?;

        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The receiver is gone only after the task has stopped.
            let _ = tx.send(res);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        log::info!("Watching checkpoint {}", version_file.display());

        let reconciler =
            CheckpointReconciler::new(store, ledger, database_path, lock, Arc::clone(&stats));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            watcher,
            rx,
            file_name,
            reconciler,
            stats,
            cancel.clone(),
        ));

        Ok(ReloadWatcher {
            cancel,
            task: Some(task),
        })
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the task and waits for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Checkpoint watcher task ended abnormally: {e}");
            }
        }
        log::debug!("Checkpoint watcher stopped");
    }
}

impl Drop for ReloadWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn split(version_file: &Path) -> Result<(PathBuf, OsString), WatchError> {
    let no_parent = || WatchError::NoParent(version_file.to_path_buf());
    let file_name = version_file.file_name().ok_or_else(no_parent)?.to_owned();
    let dir = match version_file.parent() {
        Some(dir) if dir.as_os_str().is_empty() => PathBuf::from("."),
        Some(dir) => dir.to_path_buf(),
        None => return Err(no_parent()),
    };
    Ok((dir, file_name))
}

async fn run(
    watcher: RecommendedWatcher,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    file_name: OsString,
    reconciler: CheckpointReconciler,
    stats: Arc<EngineStats>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => {
                let Some(first) = received else {
                    log::warn!("Checkpoint watcher channel closed");
                    break;
                };
                let mut relevant = is_relevant(&first, &file_name, &stats);
                while let Ok(next) = events.try_recv() {
                    relevant |= is_relevant(&next, &file_name, &stats);
                }
                if relevant {
                    reconciler.recheck().await;
                }
            }
        }
    }
    drop(watcher);
}

fn is_relevant(event: &notify::Result<Event>, file_name: &OsString, stats: &EngineStats) -> bool {
    let event = match event {
        Ok(event) => event,
        Err(e) => {
            log::error!("Checkpoint watcher error: {e}");
            stats.increment(EngineEvent::WatcherError);
            return false;
        }
    };
    if event.need_rescan() {
        return true;
    }
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(file_name.as_os_str()))
}
