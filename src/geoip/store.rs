//! Snapshot store: serves lookups and hands off to new database versions.
//!
//! The active snapshot sits behind an [`ArcSwapOption`]. A lookup loads the
//! current `Arc<Snapshot>` once and answers from it, so a swap that completes
//! mid-lookup does not change what that lookup sees. The replaced snapshot is
//! dropped, and its codec handle closed, when the last reader lets go of it.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::Notify;

use super::types::{parse_host, GeoRecord, IpLookup};
use crate::codec::{CodecHandle, GeoCodec};
use crate::error_handling::{CodecError, EngineEvent, EngineStats, LookupError, StartupError};

/// A decoded database bound to one version.
pub struct Snapshot {
    handle: Box<dyn CodecHandle>,
    version: String,
    path: PathBuf,
}

impl Snapshot {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn query(&self, ip: IpAddr) -> Result<Option<GeoRecord>, CodecError> {
        self.handle.query(ip)
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.handle.close();
        log::debug!("Released database snapshot at version {:?}", self.version);
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Holds the active snapshot.
pub struct SnapshotStore {
    codec: Arc<dyn GeoCodec>,
    current: ArcSwapOption<Snapshot>,
    closing: AtomicBool,
    inflight: AtomicUsize,
    drained: Notify,
    stats: Arc<EngineStats>,
}

/// Counts a lookup as in flight until dropped.
struct InflightGuard<'a> {
    store: &'a SnapshotStore,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if self.store.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.store.drained.notify_waiters();
        }
    }
}

impl SnapshotStore {
    /// Opens the canonical database at `path` as `version`.
    ///
    /// A missing database is a startup failure: the store never serves from an
    /// implicit empty database.
    pub async fn open(
        codec: Arc<dyn GeoCodec>,
        path: &Path,
        version: impl Into<String>,
        stats: Arc<EngineStats>,
    ) -> Result<Self, StartupError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(StartupError::MissingDatabase(path.to_path_buf()));
        }
        let version = version.into();
        let snapshot = decode(Arc::clone(&codec), path.to_path_buf(), version.clone()).await?;
        log::info!(
            "Serving geolocation database {} at version {:?}",
            path.display(),
            version
        );

        Ok(SnapshotStore {
            codec,
            current: ArcSwapOption::from_pointee(snapshot),
            closing: AtomicBool::new(false),
            inflight: AtomicUsize::new(0),
            drained: Notify::new(),
            stats,
        })
    }

    /// Version of the active snapshot (empty once closed).
    pub fn version(&self) -> String {
        self.current
            .load()
            .as_ref()
            .map(|snapshot| snapshot.version.clone())
            .unwrap_or_default()
    }

    /// The active snapshot, kept alive for as long as the caller holds it.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst) || self.current.load().is_none()
    }

    /// Looks up one address.
    pub fn lookup(&self, ip: &str) -> Result<IpLookup, LookupError> {
        let _guard = self.enter().ok_or(LookupError::Closed)?;
        let snapshot = self.current.load_full().ok_or(LookupError::Closed)?;
        self.query(&snapshot, ip)
    }

    /// Looks up a batch against one snapshot, preserving input order.
    pub fn lookup_many<S: AsRef<str>>(&self, ips: &[S]) -> Vec<Result<IpLookup, LookupError>> {
        let closed = || -> Vec<Result<IpLookup, LookupError>> {
            ips.iter().map(|_| Err(LookupError::Closed)).collect()
        };
        let Some(_guard) = self.enter() else {
            return closed();
        };
        let Some(snapshot) = self.current.load_full() else {
            return closed();
        };
        ips.iter()
            .map(|ip| self.query(&snapshot, ip.as_ref()))
            .collect()
    }

    fn query(&self, snapshot: &Snapshot, ip: &str) -> Result<IpLookup, LookupError> {
        let Some(addr) = parse_host(ip) else {
            self.stats.increment(EngineEvent::LookupInvalidAddress);
            return Err(LookupError::InvalidAddress(ip.to_string()));
        };
        match snapshot.query(addr)? {
            Some(record) => {
                self.stats.increment(EngineEvent::LookupServed);
                Ok(IpLookup {
                    ip: addr.to_string(),
                    db_version: snapshot.version.clone(),
                    record,
                })
            }
            None => {
                self.stats.increment(EngineEvent::LookupNotFound);
                Err(LookupError::NotFound(addr))
            }
        }
    }

    /// Decodes `path` and, only if that succeeds, makes it the active snapshot.
    ///
    /// Decoding runs on the blocking pool without any lock held, so lookups
    /// keep being answered from the previous snapshot until the substitution.
    /// Returns `Ok(false)` when the store started closing first and the decoded
    /// snapshot was dropped.
    pub async fn swap(&self, path: &Path, version: &str) -> Result<bool, CodecError> {
        let snapshot = match decode(
            Arc::clone(&self.codec),
            path.to_path_buf(),
            version.to_string(),
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.stats.increment(EngineEvent::SnapshotSwapFailed);
                return Err(e);
            }
        };

        if self.closing.load(Ordering::SeqCst) {
            log::debug!("Store is closing; discarding snapshot for version {version:?}");
            return Ok(false);
        }

        let previous = self.current.swap(Some(Arc::new(snapshot)));
        if previous.is_none() {
            // Raced with close(); stay closed.
            self.current.store(None);
            return Ok(false);
        }
        self.stats.increment(EngineEvent::SnapshotSwapped);
        log::info!(
            "Swapped database snapshot {:?} -> {:?}",
            previous.as_ref().map(|s| s.version.as_str()).unwrap_or(""),
            version
        );
        Ok(true)
    }

    /// Stops admitting new lookups. Lookups already running are unaffected.
    pub fn begin_shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Waits until no lookup is in flight. Returns false on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.inflight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Releases the active snapshot. Later lookups return [`LookupError::Closed`].
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(snapshot) = self.current.swap(None) {
            log::debug!("Closing snapshot store at version {:?}", snapshot.version);
        }
    }

    fn enter(&self) -> Option<InflightGuard<'_>> {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let guard = InflightGuard { store: self };
        if self.closing.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }
}

async fn decode(
    codec: Arc<dyn GeoCodec>,
    path: PathBuf,
    version: String,
) -> Result<Snapshot, CodecError> {
    tokio::task::spawn_blocking(move || {
        let handle = codec.open(&path)?;
        Ok(Snapshot {
            handle,
            version,
            path,
        })
    })
    .await
    .map_err(|e| CodecError::Other(anyhow::anyhow!("database decode task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Network, TableBuilder, TableCodec};
    use crate::geoip::Country;
    use tempfile::TempDir;

    fn country(code: &str) -> GeoRecord {
        GeoRecord {
            country: Some(Country {
                iso_code: Some(code.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn write_db(path: &Path, code: &str) {
        TableBuilder::new("test")
            .insert(Network::host("1.2.3.4".parse().unwrap()), country(code))
            .write(path)
            .expect("Failed to write test database");
    }

    async fn open_store(path: &Path, version: &str) -> SnapshotStore {
        SnapshotStore::open(
            Arc::new(TableCodec),
            path,
            version,
            Arc::new(EngineStats::new()),
        )
        .await
        .expect("Failed to open store")
    }

    fn iso(result: &Result<IpLookup, LookupError>) -> Option<String> {
        result
            .as_ref()
            .ok()
            .and_then(|r| r.record.country.as_ref())
            .and_then(|c| c.iso_code.clone())
    }

    #[tokio::test]
    async fn test_open_missing_database_is_fatal() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let result = SnapshotStore::open(
            Arc::new(TableCodec),
            &dir.path().join("missing.mmdb"),
            "",
            Arc::new(EngineStats::new()),
        )
        .await;
        assert!(matches!(result, Err(StartupError::MissingDatabase(_))));
    }

    #[tokio::test]
    async fn test_open_corrupt_database_is_fatal() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("corrupt.mmdb");
        std::fs::write(&path, b"not a database").unwrap();
        let result = SnapshotStore::open(
            Arc::new(TableCodec),
            &path,
            "",
            Arc::new(EngineStats::new()),
        )
        .await;
        assert!(matches!(result, Err(StartupError::Open(_))));
    }

    #[tokio::test]
    async fn test_lookup_results_preserve_order_and_errors() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("geo.mmdb");
        write_db(&path, "US");
        let store = open_store(&path, "v1").await;

        let results = store.lookup_many(&["1.2.3.4", "bogus", "5.6.7.8", " 1.2.3.4 "]);
        assert_eq!(results.len(), 4);
        assert_eq!(iso(&results[0]).as_deref(), Some("US"));
        assert!(matches!(results[1], Err(LookupError::InvalidAddress(_))));
        assert!(matches!(results[2], Err(LookupError::NotFound(_))));
        assert_eq!(iso(&results[3]).as_deref(), Some("US"));
        assert_eq!(results[0].as_ref().unwrap().db_version, "v1");
    }

    #[tokio::test]
    async fn test_swap_replaces_snapshot_and_version() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("geo.mmdb");
        write_db(&path, "US");
        let store = open_store(&path, "v1").await;

        write_db(&path, "CA");
        assert!(store.swap(&path, "v2").await.unwrap());
        assert_eq!(store.version(), "v2");
        assert_eq!(iso(&store.lookup("1.2.3.4")).as_deref(), Some("CA"));
    }

    #[tokio::test]
    async fn test_held_snapshot_survives_swap() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("geo.mmdb");
        write_db(&path, "US");
        let store = open_store(&path, "v1").await;

        // A lookup that started before the swap holds this snapshot.
        let in_flight = store.snapshot().unwrap();

        write_db(&path, "CA");
        store.swap(&path, "v2").await.unwrap();

        let old = in_flight.query("1.2.3.4".parse().unwrap()).unwrap().unwrap();
        assert_eq!(old, country("US"));
        assert_eq!(in_flight.version(), "v1");
        assert_eq!(store.snapshot().unwrap().version(), "v2");
    }

    #[tokio::test]
    async fn test_failed_swap_keeps_serving_last_good_snapshot() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("geo.mmdb");
        write_db(&path, "US");
        let stats = Arc::new(EngineStats::new());
        let store = SnapshotStore::open(Arc::new(TableCodec), &path, "v1", Arc::clone(&stats))
            .await
            .unwrap();

        let broken = dir.path().join("broken.mmdb");
        std::fs::write(&broken, b"garbage").unwrap();
        assert!(store.swap(&broken, "v2").await.is_err());

        assert_eq!(store.version(), "v1");
        assert_eq!(iso(&store.lookup("1.2.3.4")).as_deref(), Some("US"));
        assert_eq!(stats.count(EngineEvent::SnapshotSwapFailed), 1);
    }

    #[tokio::test]
    async fn test_close_rejects_lookups() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("geo.mmdb");
        write_db(&path, "US");
        let store = open_store(&path, "v1").await;

        store.close();
        assert!(store.is_closed());
        assert!(matches!(store.lookup("1.2.3.4"), Err(LookupError::Closed)));
        let batch = store.lookup_many(&["1.2.3.4", "5.6.7.8"]);
        assert!(batch.iter().all(|r| matches!(r, Err(LookupError::Closed))));
        assert_eq!(store.version(), "");
        assert_eq!(store.inflight(), 0);
    }

    #[tokio::test]
    async fn test_swap_after_close_reports_discarded() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("geo.mmdb");
        write_db(&path, "US");
        let store = open_store(&path, "v1").await;

        store.close();
        write_db(&path, "CA");
        assert!(!store.swap(&path, "v2").await.unwrap());
        assert!(store.snapshot().is_none());
        assert_eq!(store.version(), "");
    }

    #[tokio::test]
    async fn test_drain_waits_for_inflight_lookups() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("geo.mmdb");
        write_db(&path, "US");
        let store = Arc::new(open_store(&path, "v1").await);

        assert!(store.drain(Duration::from_millis(10)).await);

        let guard = store.enter().unwrap();
        assert_eq!(store.inflight(), 1);
        assert!(!store.drain(Duration::from_millis(20)).await);

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.drain(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert!(waiter.await.unwrap());
    }
}
