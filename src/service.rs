//! The engine façade used by the adapter layer.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::codec::{GeoCodec, GeoCodecWriter, TableCodec};
use crate::config::Config;
use crate::error_handling::{EngineStats, LookupError, StartupError, UpdateError};
use crate::geoip::{IpLookup, OverrideRecord, SnapshotStore};
use crate::ledger::VersionLedger;
use crate::watcher::ReloadWatcher;
use crate::writer::{OverrideWriter, WriterState};

/// A running geolocation engine.
///
/// # Examples
///
/// ```no_run
/// use geolize::{Config, GeoRecord, GeoService, OverrideRecord};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let service = GeoService::start(Config::with_data_dir("data")).await?;
///
/// let version = service
///     .update(OverrideRecord::new("1.2.3.4", GeoRecord::default()))
///     .await?;
/// for result in service.lookup(&["1.2.3.4"])? {
///     let found = result?;
///     assert_eq!(found.db_version, version);
///     println!("{} -> {:?}", found.ip, found.record.country);
/// }
///
/// service.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct GeoService {
    config: Config,
    store: Arc<SnapshotStore>,
    writer: OverrideWriter,
    watcher: Mutex<Option<ReloadWatcher>>,
    stats: Arc<EngineStats>,
}

impl GeoService {
    /// Starts the engine with the bundled record table codec.
    pub async fn start(config: Config) -> Result<Self, StartupError> {
        Self::start_with_codec(config, Arc::new(TableCodec), Arc::new(TableCodec)).await
    }

    /// Starts the engine.
    ///
    /// Startup order: validate the configuration, check the canonical database
    /// exists, prepare the ledger, replay pending entries, open the snapshot at
    /// the checkpoint, then start watching the checkpoint. Any failure before
    /// the watcher is fatal.
    pub async fn start_with_codec(
        config: Config,
        reader: Arc<dyn GeoCodec>,
        writer: Arc<dyn GeoCodecWriter>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let database_path = config.database_path();
        if !tokio::fs::try_exists(&database_path).await.unwrap_or(false) {
            log::error!(
                "Canonical database {} does not exist",
                database_path.display()
            );
            return Err(StartupError::MissingDatabase(database_path));
        }

        let stats = Arc::new(EngineStats::new());
        let ledger = Arc::new(VersionLedger::new(&config));
        ledger.prepare().await?;

        let override_writer =
            OverrideWriter::new(&config, writer, Arc::clone(&ledger), Arc::clone(&stats));
        override_writer.catch_up().await?;

        let version = ledger.get_version().await?;
        let store = Arc::new(
            SnapshotStore::open(reader, &database_path, version, Arc::clone(&stats)).await?,
        );

        override_writer.attach_store(Arc::clone(&store));

        let watcher = match ReloadWatcher::start(
            Arc::clone(&store),
            Arc::clone(&ledger),
            database_path,
            override_writer.publish_lock(),
            Arc::clone(&stats),
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) if config.require_watcher => {
                store.close();
                return Err(e.into());
            }
            Err(e) => {
                log::error!("Checkpoint watcher unavailable, hot reload disabled: {e}");
                None
            }
        };

        log::info!(
            "Geolocation engine started at version {:?} (data dir {})",
            store.version(),
            config.data_dir.display()
        );

        Ok(GeoService {
            config,
            store,
            writer: override_writer,
            watcher: Mutex::new(watcher),
            stats,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Looks up a batch of addresses against one snapshot. Results keep the
    /// input order; each address fails or succeeds on its own.
    pub fn lookup<S: AsRef<str>>(
        &self,
        ips: &[S],
    ) -> Result<Vec<Result<IpLookup, LookupError>>, LookupError> {
        if ips.is_empty() {
            return Err(LookupError::EmptyRequest);
        }
        Ok(self.store.lookup_many(ips))
    }

    /// Records an override and publishes it. Returns the new database
    /// version, which lookups report once the call has returned.
    pub async fn update(&self, record: OverrideRecord) -> Result<String, UpdateError> {
        let outcome = self.writer.update(record).await?;
        Ok(outcome.version().to_string())
    }

    /// Version of the snapshot currently answering lookups.
    pub fn version(&self) -> String {
        self.store.version()
    }

    pub fn writer_state(&self) -> WriterState {
        self.writer.state()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// True while the checkpoint watcher task is alive.
    pub async fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .await
            .as_ref()
            .is_some_and(ReloadWatcher::is_running)
    }

    /// Stops the engine: refuse new lookups, wait for in-flight ones, stop
    /// the watcher, then release the snapshot. Safe to call more than once.
    pub async fn shutdown(&self) {
        log::info!("Shutting down geolocation engine");
        self.store.begin_shutdown();

        if !self.store.drain(self.config.shutdown_drain_timeout).await {
            log::warn!(
                "{} lookups still in flight after {:?}",
                self.store.inflight(),
                self.config.shutdown_drain_timeout
            );
        }

        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.stop().await;
        }

        self.store.close();

        for (event, count) in self.stats.snapshot() {
            log::info!("{event}: {count}");
        }
    }
}
