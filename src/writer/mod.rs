//! Override writer: the single write path to the canonical database.
//!
//! Every write-side operation (append, merge, apply, checkpoint) runs under one
//! async mutex, so at most one publish pipeline is active per process. The
//! pipeline is:
//!
//! 1. read the checkpoint and list the entries at or after it
//! 2. merge them into one replay unit
//! 3. apply the unit to a working copy and rename it over the database
//! 4. advance the checkpoint
//! 5. drop the consumed per-call entries
//!
//! The rename in step 3 is the only durability boundary. A crash between 3 and
//! 4 leaves the old checkpoint in place; the next catch-up re-applies the same
//! entries, which is harmless because every override replaces whole facets.

mod apply;
mod catch_up;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{watch, Mutex, MutexGuard};

use crate::codec::GeoCodecWriter;
use crate::config::Config;
use crate::error_handling::{
    ApplyError, EngineEvent, EngineStats, PublishError, UpdateError,
};
use crate::geoip::{OverrideRecord, SnapshotStore};
use crate::ledger::{LedgerEntry, VersionLedger};
use crate::merge::{MergedEntry, Merger};

pub use catch_up::CatchUpOutcome;

/// Startup state of the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WriterState {
    /// Catch-up has not been triggered
    Idle = 0,
    /// Replaying pending entries
    CatchingUp = 1,
    /// Accepting updates
    Ready = 2,
    /// Catch-up failed; the writer will not accept updates
    Failed = 3,
}

impl WriterState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WriterState::Idle,
            1 => WriterState::CatchingUp,
            2 => WriterState::Ready,
            _ => WriterState::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WriterState::Idle => "idle",
            WriterState::CatchingUp => "catching_up",
            WriterState::Ready => "ready",
            WriterState::Failed => "failed",
        }
    }
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one publish pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// No pending entries; the database already is at `version`.
    UpToDate { version: String },
    /// Pending entries were applied and the checkpoint advanced to `version`.
    Published {
        version: String,
        entries: usize,
        overrides: usize,
    },
}

impl PublishOutcome {
    pub fn version(&self) -> &str {
        match self {
            PublishOutcome::UpToDate { version } | PublishOutcome::Published { version, .. } => {
                version
            }
        }
    }
}

/// Serializes everything that replaces the canonical database or the active
/// snapshot within one process.
///
/// Held by the writer for the whole publish pipeline and by the checkpoint
/// watcher while it reloads, so a snapshot is never decoded from a database
/// that is newer than the checkpoint it was labelled with.
#[derive(Debug, Clone, Default)]
pub struct PublishLock(Arc<Mutex<()>>);

impl PublishLock {
    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().await
    }
}

pub struct OverrideWriter {
    codec: Arc<dyn GeoCodecWriter>,
    ledger: Arc<VersionLedger>,
    merger: Merger,
    database_path: PathBuf,
    retain_merged_entries: bool,
    state: AtomicU8,
    state_tx: watch::Sender<WriterState>,
    lock: PublishLock,
    store: OnceLock<Arc<SnapshotStore>>,
    stats: Arc<EngineStats>,
}

impl OverrideWriter {
    pub fn new(
        config: &Config,
        codec: Arc<dyn GeoCodecWriter>,
        ledger: Arc<VersionLedger>,
        stats: Arc<EngineStats>,
    ) -> Self {
        let (state_tx, _) = watch::channel(WriterState::Idle);
        OverrideWriter {
            codec,
            merger: Merger::new(Arc::clone(&ledger)),
            ledger,
            database_path: config.database_path(),
            retain_merged_entries: config.retain_merged_entries,
            state: AtomicU8::new(WriterState::Idle as u8),
            state_tx,
            lock: PublishLock::default(),
            store: OnceLock::new(),
            stats,
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn publish_lock(&self) -> PublishLock {
        self.lock.clone()
    }

    /// Makes every later publish swap `store` to the new version before the
    /// publish lock is released. Only the first call has an effect.
    pub fn attach_store(&self, store: Arc<SnapshotStore>) {
        if self.store.set(store).is_err() {
            log::warn!("Override writer already has a snapshot store attached");
        }
    }

    pub fn state(&self) -> WriterState {
        WriterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Resolves once catch-up has finished, with the final state
    /// ([`WriterState::Ready`] or [`WriterState::Failed`]).
    pub async fn wait_ready(&self) -> WriterState {
        let mut rx = self.state_tx.subscribe();
        let state = match rx
            .wait_for(|s| matches!(s, WriterState::Ready | WriterState::Failed))
            .await
        {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    fn transition(&self, from: WriterState, to: WriterState) -> bool {
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if swapped {
            self.state_tx.send_replace(to);
            log::debug!("Override writer state {from} -> {to}");
        }
        swapped
    }

    /// Appends one override and publishes everything pending, including it.
    ///
    /// Rejected with [`UpdateError::NotReady`] until catch-up has completed;
    /// the ledger is not touched in that case.
    pub async fn update(&self, record: OverrideRecord) -> Result<PublishOutcome, UpdateError> {
        let state = self.state();
        if state != WriterState::Ready {
            self.stats.increment(EngineEvent::UpdateRejectedNotReady);
            return Err(UpdateError::NotReady(state));
        }
        if record.host().is_none() {
            self.stats.increment(EngineEvent::UpdateFailed);
            return Err(UpdateError::InvalidAddress(record.ip));
        }

        let _guard = self.lock.acquire().await;
        let entry = match self.ledger.append(record).await {
            Ok(entry) => entry,
            Err(e) => {
                log::error!("Failed to append override to the ledger: {e}");
                self.stats.increment(EngineEvent::UpdateFailed);
                return Err(UpdateError::Append(e));
            }
        };

        match self.publish_locked().await {
            Ok(outcome) => {
                self.stats.increment(EngineEvent::UpdateApplied);
                Ok(outcome)
            }
            Err(e) => {
                log::error!("Failed to publish ledger entry {}: {e}", entry.name);
                self.stats.increment(EngineEvent::UpdateFailed);
                Err(e.into())
            }
        }
    }

    /// Runs the publish pipeline for whatever is pending.
    pub async fn publish(&self) -> Result<PublishOutcome, PublishError> {
        let _guard = self.lock.acquire().await;
        self.publish_locked().await
    }

    /// Applies a merged entry to the canonical database. Does not touch the
    /// checkpoint.
    pub async fn apply(&self, entry: &LedgerEntry) -> Result<usize, ApplyError> {
        let _guard = self.lock.acquire().await;
        self.apply_locked(entry.clone()).await
    }

    async fn apply_locked(&self, entry: LedgerEntry) -> Result<usize, ApplyError> {
        let codec = Arc::clone(&self.codec);
        let path = self.database_path.clone();
        tokio::task::spawn_blocking(move || apply::apply_entry(codec.as_ref(), &path, &entry))
            .await
            .map_err(|e| ApplyError::Task(e.to_string()))?
    }

    async fn publish_locked(&self) -> Result<PublishOutcome, PublishError> {
        let version = self.ledger.try_get_version().await?.unwrap_or_default();
        let pending = self.ledger.list_entries_from(&version).await?;
        if pending.is_empty() {
            return Ok(PublishOutcome::UpToDate { version });
        }

        let merged = self.merger.merge(&pending).await?;
        let overrides = match self.commit(&merged).await {
            Ok(overrides) => overrides,
            Err(e) => {
                if !self.retain_merged_entries {
                    self.remove_merged(&merged).await;
                }
                return Err(e);
            }
        };
        log::info!(
            "Published database version {} ({} entries, {} overrides)",
            merged.version(),
            pending.len(),
            overrides
        );
        self.stats.add(EngineEvent::EntriesReplayed, pending.len());

        self.cleanup(&merged).await;
        self.swap_attached(merged.version()).await;

        Ok(PublishOutcome::Published {
            version: merged.version().to_string(),
            entries: pending.len(),
            overrides,
        })
    }

    /// Applies `merged` and moves the checkpoint to it.
    async fn commit(&self, merged: &MergedEntry) -> Result<usize, PublishError> {
        let overrides = self.apply_locked(merged.entry.clone()).await?;
        self.ledger.set_version(merged.version()).await?;
        Ok(overrides)
    }

    async fn swap_attached(&self, version: &str) {
        let Some(store) = self.store.get() else {
            return;
        };
        if store.is_closed() || store.version() == version {
            return;
        }
        if let Err(e) = store.swap(&self.database_path, version).await {
            // The checkpoint has moved; the watcher retries on its next event.
            log::error!("Published version {version:?} but failed to load it: {e}");
        }
    }

    /// Drops every entry at or before the new checkpoint, oldest first.
    ///
    /// Stops at the first failed removal: the checkpoint entry must outlive
    /// anything older, or the next listing falls back to the whole ledger and
    /// replays stale overrides. Leftovers are swept by the next publish.
    async fn cleanup(&self, merged: &MergedEntry) {
        let version = merged.version();
        let consumed = match self.ledger.list_entries().await {
            Ok(names) => names
                .into_iter()
                .filter(|name| name.as_str() <= version)
                .collect(),
            Err(e) => {
                log::warn!("Failed to list ledger entries for cleanup: {e}");
                merged.sources.clone()
            }
        };
        for name in &consumed {
            if let Err(e) = self.ledger.remove_entry(name).await {
                log::warn!("Failed to remove consumed ledger entry {name}: {e}");
                break;
            }
        }
        if !self.retain_merged_entries {
            self.remove_merged(merged).await;
        }
    }

    async fn remove_merged(&self, merged: &MergedEntry) {
        if let Err(e) = self.ledger.remove_entry(&merged.file_name).await {
            log::warn!(
                "Failed to remove merged ledger entry {}: {e}",
                merged.file_name
            );
        }
    }
}
