//! Error type definitions.
//!
//! One enum per failure domain. The domains map onto how the service reacts:
//! [`StartupError`] stops the process from serving, [`LookupError`] goes back to
//! the caller of a single lookup, [`UpdateError`] goes back to the caller of an
//! update while the published database stays at its last good version, and
//! [`WatchError`] is logged by the watcher and never reaches lookups.

use std::net::IpAddr;
use std::path::PathBuf;

use log::SetLoggerError;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

use crate::writer::WriterState;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),
}

/// Invalid engine configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("database name must not be empty")]
    EmptyDatabaseName,

    #[error("database name must be a plain file name: {0:?}")]
    InvalidDatabaseName(String),

    #[error("data directory must not be empty")]
    EmptyDataDir,
}

/// Failures reported by a geolocation codec.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a database this codec understands.
    #[error("{0} is not a record table database")]
    BadMagic(PathBuf),

    #[error("unsupported record table format version {0}")]
    UnsupportedVersion(u32),

    #[error("database encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("invalid network {addr}/{prefix}")]
    InvalidNetwork { addr: IpAddr, prefix: u8 },

    /// Failure inside an external codec implementation.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Per-address lookup failures.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("lookup request contains no addresses")]
    EmptyRequest,

    #[error("invalid IP address: {0:?}")]
    InvalidAddress(String),

    #[error("no record found for {0}")]
    NotFound(IpAddr),

    /// The store has been shut down.
    #[error("snapshot store is closed")]
    Closed,

    #[error("database query failed: {0}")]
    Codec(#[from] CodecError),
}

/// Ledger and checkpoint I/O failures.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted entry could not be parsed.
    #[error("malformed ledger entry {name}: {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode ledger entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid ledger entry name: {0:?}")]
    InvalidName(String),
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LedgerError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures collapsing ledger entries into one replay unit.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("nothing to merge")]
    Empty,

    #[error("failed to read ledger entry {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: LedgerError,
    },

    #[error("failed to write merged entry: {0}")]
    Write(#[source] LedgerError),
}

/// Failures applying a replay unit to the canonical database.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// Raised before anything is written.
    #[error("override #{index} has an invalid host address {ip:?}")]
    InvalidAddress { index: usize, ip: String },

    #[error("failed to load working copy from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("failed to apply override for {ip}: {source}")]
    Upsert {
        ip: IpAddr,
        #[source]
        source: CodecError,
    },

    #[error("failed to serialize database: {0}")]
    Serialize(#[source] CodecError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("apply task failed: {0}")]
    Task(String),
}

/// Failures of the merge → apply → checkpoint pipeline.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Failures returned to the caller of an update.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The writer has not finished its startup catch-up. Retry later.
    #[error("writer is not ready yet (state: {0})")]
    NotReady(WriterState),

    #[error("invalid host address: {0:?}")]
    InvalidAddress(String),

    #[error("failed to append override: {0}")]
    Append(#[source] LedgerError),

    #[error("failed to publish override: {0}")]
    Publish(#[from] PublishError),
}

impl UpdateError {
    /// True when the same update may succeed if retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpdateError::NotReady(_))
    }
}

/// Checkpoint watcher failures.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("checkpoint path has no parent directory: {0}")]
    NoParent(PathBuf),
}

/// Conditions that stop the service from starting.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("canonical database does not exist: {0}")]
    MissingDatabase(PathBuf),

    #[error("failed to prepare data directory {path}: {source}")]
    Layout {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] LedgerError),

    #[error("catch-up replay failed: {0}")]
    CatchUp(#[from] PublishError),

    #[error("failed to open canonical database: {0}")]
    Open(#[from] CodecError),

    #[error("failed to start checkpoint watcher: {0}")]
    Watcher(#[from] WatchError),
}

/// Engine events counted by [`super::EngineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum EngineEvent {
    LookupServed,
    LookupNotFound,
    LookupInvalidAddress,
    UpdateApplied,
    UpdateFailed,
    UpdateRejectedNotReady,
    EntriesReplayed,
    SnapshotSwapped,
    SnapshotSwapFailed,
    CheckpointRecreated,
    WatcherError,
}

impl std::fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineEvent::LookupServed => "Lookup served",
            EngineEvent::LookupNotFound => "Lookup not found",
            EngineEvent::LookupInvalidAddress => "Lookup invalid address",
            EngineEvent::UpdateApplied => "Update applied",
            EngineEvent::UpdateFailed => "Update failed",
            EngineEvent::UpdateRejectedNotReady => "Update rejected (writer not ready)",
            EngineEvent::EntriesReplayed => "Ledger entries replayed",
            EngineEvent::SnapshotSwapped => "Snapshot swapped",
            EngineEvent::SnapshotSwapFailed => "Snapshot swap failed",
            EngineEvent::CheckpointRecreated => "Checkpoint recreated",
            EngineEvent::WatcherError => "Watcher error",
        }
    }
}
