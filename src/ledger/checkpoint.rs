//! Durable file writes and the version checkpoint.

use std::io::ErrorKind;
use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::config::TEMP_SUFFIX;
use crate::error_handling::LedgerError;

/// Writes `bytes` to `path` so that readers see either the old content or the
/// new content, never a prefix: temp file, fsync, rename, then a best-effort
/// fsync of the directory.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LedgerError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TEMP_SUFFIX);
    let tmp = std::path::PathBuf::from(tmp);

    let result = async {
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| LedgerError::io(&tmp, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| LedgerError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| LedgerError::io(&tmp, e))?;
        drop(file);
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| LedgerError::io(path, e))
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
        return result;
    }

    if let Some(dir) = path.parent() {
        sync_dir(dir).await;
    }
    Ok(())
}

async fn sync_dir(dir: &Path) {
    match tokio::fs::File::open(dir).await {
        Ok(handle) => {
            if let Err(e) = handle.sync_all().await {
                log::debug!("Directory fsync failed for {}: {e}", dir.display());
            }
        }
        Err(e) => log::debug!("Could not open {} for fsync: {e}", dir.display()),
    }
}

/// Reads the checkpoint. `Ok(None)` when the file does not exist.
pub(crate) async fn read_version(path: &Path) -> Result<Option<String>, LedgerError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text.trim().to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LedgerError::io(path, e)),
    }
}

pub(crate) async fn write_version(path: &Path, version: &str) -> Result<(), LedgerError> {
    write_atomic(path, version.trim().as_bytes()).await
}
