//! Replays a ledger entry onto the canonical database.
//!
//! Runs on the blocking pool. The canonical file is only ever replaced by a
//! rename from a fully written and synced temp file in the same directory.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::{GeoCodecWriter, Network, WriterHandle};
use crate::config::TEMP_SUFFIX;
use crate::error_handling::ApplyError;
use crate::ledger::LedgerEntry;

/// Applies every override of `entry`, in order, to the database at
/// `database_path` and publishes the result in place. Returns the number of
/// overrides applied.
pub(crate) fn apply_entry(
    codec: &dyn GeoCodecWriter,
    database_path: &Path,
    entry: &LedgerEntry,
) -> Result<usize, ApplyError> {
    let hosts = validate_hosts(entry)?;

    let mut working = codec
        .load(database_path)
        .map_err(|source| ApplyError::Load {
            path: database_path.to_path_buf(),
            source,
        })?;

    for (host, record) in hosts.iter().zip(&entry.overrides) {
        working
            .upsert_facets(Network::host(*host), &mut |existing| {
                let mut merged = existing.unwrap_or_default();
                merged.replace_facets(&record.fields);
                merged
            })
            .map_err(|source| ApplyError::Upsert { ip: *host, source })?;
    }

    let tmp = temp_path(database_path);
    if let Err(e) = publish(working.as_ref(), &tmp, database_path) {
        if let Err(cleanup) = std::fs::remove_file(&tmp) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove temp file {}: {cleanup}", tmp.display());
            }
        }
        return Err(e);
    }

    Ok(hosts.len())
}

/// Every address must be a single host. Checked before any file is touched.
fn validate_hosts(entry: &LedgerEntry) -> Result<Vec<IpAddr>, ApplyError> {
    entry
        .overrides
        .iter()
        .enumerate()
        .map(|(index, record)| {
            record.host().ok_or_else(|| ApplyError::InvalidAddress {
                index,
                ip: record.ip.clone(),
            })
        })
        .collect()
}

fn publish(working: &dyn WriterHandle, tmp: &Path, target: &Path) -> Result<(), ApplyError> {
    let file = File::create(tmp).map_err(io_err(tmp))?;
    let mut sink = BufWriter::new(file);
    working
        .serialize(&mut sink)
        .map_err(ApplyError::Serialize)?;
    let file = sink
        .into_inner()
        .map_err(|e| ApplyError::Io {
            path: tmp.to_path_buf(),
            source: e.into_error(),
        })?;
    file.sync_all().map_err(io_err(tmp))?;
    drop(file);

    std::fs::rename(tmp, target).map_err(io_err(target))?;

    if let Some(dir) = target.parent() {
        if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
            log::debug!("Directory fsync failed for {}: {e}", dir.display());
        }
    }
    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ApplyError {
    let path = path.to_path_buf();
    move |source| ApplyError::Io { path, source }
}

/// `<database>__<micros>.tmp`, next to the database so the rename stays on
/// one filesystem.
fn temp_path(database_path: &Path) -> PathBuf {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    let mut name = database_path.as_os_str().to_owned();
    name.push(format!("__{micros}{TEMP_SUFFIX}"));
    PathBuf::from(name)
}
