//! Version ledger: the append-only log of overrides and the checkpoint.
//!
//! Every update is persisted as its own JSON entry under `histories/` before
//! anything else happens to it. The checkpoint file names the last entry whose
//! overrides are fully contained in the canonical database; it is written only
//! through [`VersionLedger::set_version`].

mod checkpoint;
mod naming;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error_handling::LedgerError;
use crate::geoip::OverrideRecord;

pub(crate) use checkpoint::write_atomic;
use naming::{is_entry_file, is_plain_name, merged_file_name, next_entry_name, EntryName};

/// A durable group of overrides.
///
/// Per-call entries hold one override and are named after their own file.
/// Merged entries carry the `name` of the last entry they absorbed, which is
/// the version the canonical database reaches once they are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub name: String,
    pub overrides: Vec<OverrideRecord>,
}

/// Owns `histories/` and the checkpoint file.
#[derive(Debug, Clone)]
pub struct VersionLedger {
    histories_dir: PathBuf,
    version_file: PathBuf,
}

impl VersionLedger {
    pub fn new(config: &Config) -> Self {
        VersionLedger {
            histories_dir: config.histories_dir(),
            version_file: config.version_file(),
        }
    }

    pub fn histories_dir(&self) -> &Path {
        &self.histories_dir
    }

    pub fn version_file(&self) -> &Path {
        &self.version_file
    }

    /// Creates the histories directory and, if missing, an empty checkpoint.
    pub async fn prepare(&self) -> Result<(), LedgerError> {
        tokio::fs::create_dir_all(&self.histories_dir)
            .await
            .map_err(|e| LedgerError::io(&self.histories_dir, e))?;
        if let Some(parent) = self.version_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LedgerError::io(parent, e))?;
        }
        if self.try_get_version().await?.is_none() {
            log::info!(
                "Checkpoint {} not found; creating an empty one",
                self.version_file.display()
            );
            self.set_version("").await?;
        }
        Ok(())
    }

    /// Durably appends `record` as a new entry and returns it.
    pub async fn append(&self, record: OverrideRecord) -> Result<LedgerEntry, LedgerError> {
        let mut newest = self
            .list_entries()
            .await?
            .last()
            .and_then(|name| EntryName::parse(name));
        if let Some(checkpoint) = self
            .try_get_version()
            .await?
            .as_deref()
            .and_then(EntryName::parse)
        {
            if newest.as_ref().map_or(true, |n| checkpoint > *n) {
                newest = Some(checkpoint);
            }
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let file_name = next_entry_name(now, newest.as_ref(), record.ip.trim()).to_string();

        let entry = LedgerEntry {
            id: record.ip.trim().to_string(),
            name: file_name.clone(),
            overrides: vec![record],
        };
        let bytes = serde_json::to_vec(&entry)?;
        write_atomic(&self.histories_dir.join(&file_name), &bytes).await?;
        log::debug!("Appended ledger entry {file_name}");
        Ok(entry)
    }

    /// All per-call entry names in replay order.
    pub async fn list_entries(&self) -> Result<Vec<String>, LedgerError> {
        let mut dir = match tokio::fs::read_dir(&self.histories_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::io(&self.histories_dir, e)),
        };

        let mut names = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| LedgerError::io(&self.histories_dir, e))?
        {
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_entry_file(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Entries at or after `version`. The whole ledger when `version` is empty
    /// or no longer present, so nothing is ever skipped.
    pub async fn list_entries_from(&self, version: &str) -> Result<Vec<String>, LedgerError> {
        let mut names = self.list_entries().await?;
        let version = version.trim();
        if version.is_empty() {
            return Ok(names);
        }
        match names.iter().position(|name| name == version) {
            Some(index) => Ok(names.split_off(index)),
            None => Ok(names),
        }
    }

    pub async fn read_entry(&self, name: &str) -> Result<LedgerEntry, LedgerError> {
        let path = self.entry_path(name)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| LedgerError::io(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| LedgerError::Malformed {
            name: name.to_string(),
            source,
        })
    }

    /// Durably writes a merged entry as `merged_<entry.name>` and returns the
    /// file name.
    pub async fn write_merged(&self, entry: &LedgerEntry) -> Result<String, LedgerError> {
        let file_name = merged_file_name(&entry.name);
        let path = self.entry_path(&file_name)?;
        let bytes = serde_json::to_vec(entry)?;
        write_atomic(&path, &bytes).await?;
        Ok(file_name)
    }

    /// Removes an entry. Removing an entry that is already gone succeeds.
    pub async fn remove_entry(&self, name: &str) -> Result<(), LedgerError> {
        let path = self.entry_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LedgerError::io(&path, e)),
        }
    }

    /// The checkpoint value, or `None` when the file is missing.
    pub async fn try_get_version(&self) -> Result<Option<String>, LedgerError> {
        checkpoint::read_version(&self.version_file).await
    }

    /// The checkpoint value. A missing file is an error.
    pub async fn get_version(&self) -> Result<String, LedgerError> {
        self.try_get_version().await?.ok_or_else(|| {
            LedgerError::io(
                &self.version_file,
                std::io::Error::new(ErrorKind::NotFound, "checkpoint file is missing"),
            )
        })
    }

    /// Atomically replaces the checkpoint.
    pub async fn set_version(&self, version: &str) -> Result<(), LedgerError> {
        checkpoint::write_version(&self.version_file, version).await
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf, LedgerError> {
        if !is_plain_name(name) {
            return Err(LedgerError::InvalidName(name.to_string()));
        }
        Ok(self.histories_dir.join(name))
    }
}
