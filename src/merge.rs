//! Collapses a run of pending ledger entries into one replay unit.

use std::sync::Arc;

use crate::error_handling::MergeError;
use crate::ledger::{LedgerEntry, VersionLedger};

/// The output of a merge pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedEntry {
    /// File name of the merged entry in the histories directory
    pub file_name: String,
    pub entry: LedgerEntry,
    /// Entry names that were absorbed, in replay order
    pub sources: Vec<String>,
}

impl MergedEntry {
    /// The version the canonical database reaches once this entry is applied.
    pub fn version(&self) -> &str {
        &self.entry.name
    }
}

pub struct Merger {
    ledger: Arc<VersionLedger>,
}

impl Merger {
    pub fn new(ledger: Arc<VersionLedger>) -> Self {
        Merger { ledger }
    }

    /// Concatenates the overrides of `names` in order and durably writes the
    /// result as `merged_<last name>`. Every input is read before anything is
    /// written, so a bad input leaves no partial output. Inputs are not removed.
    pub async fn merge(&self, names: &[String]) -> Result<MergedEntry, MergeError> {
        let Some(last_name) = names.last() else {
            return Err(MergeError::Empty);
        };

        let mut overrides = Vec::new();
        let mut last_id = String::new();
        for name in names {
            let entry = self
                .ledger
                .read_entry(name)
                .await
                .map_err(|source| MergeError::Read {
                    name: name.clone(),
                    source,
                })?;
            last_id = entry.id;
            overrides.extend(entry.overrides);
        }

        let entry = LedgerEntry {
            id: last_id,
            name: last_name.clone(),
            overrides,
        };
        let file_name = self
            .ledger
            .write_merged(&entry)
            .await
            .map_err(MergeError::Write)?;
        log::debug!(
            "Merged {} ledger entries ({} overrides) into {}",
            names.len(),
            entry.overrides.len(),
            file_name
        );

        Ok(MergedEntry {
            file_name,
            entry,
            sources: names.to_vec(),
        })
    }
}
