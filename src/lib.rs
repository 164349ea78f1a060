//! geolize: a versioned, hot-reloadable geolocation database engine
//!
//! The engine answers IP lookups from a decoded database snapshot while
//! accepting point overrides. Each override is appended to a durable ledger,
//! replayed onto a working copy of the database, and published by atomic
//! rename. Readers move to the new version without being blocked.
//!
//! # Example
//!
//! ```no_run
//! use geolize::{Config, Country, GeoRecord, GeoService, OverrideRecord};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = GeoService::start(Config::with_data_dir("data")).await?;
//!
//! let record = GeoRecord {
//!     country: Some(Country {
//!         iso_code: Some("US".into()),
//!         ..Default::default()
//!     }),
//!     ..Default::default()
//! };
//! service.update(OverrideRecord::new("1.2.3.4", record)).await?;
//!
//! let results = service.lookup(&["1.2.3.4"])?;
//! println!("{:?}", results[0].as_ref().map(|r| &r.record.country));
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. The checkpoint watcher and the
//! publish pipeline run on it.

pub mod codec;
pub mod config;
pub mod error_handling;
pub mod geoip;
pub mod initialization;
pub mod ledger;
pub mod merge;
mod service;
pub mod watcher;
pub mod writer;

// Re-export public API
pub use codec::{GeoCodec, GeoCodecWriter, Network, TableBuilder, TableCodec};
pub use config::{Config, LogFormat, LogLevel};
pub use error_handling::{
    EngineEvent, EngineStats, LookupError, StartupError, UpdateError, WatchError,
};
pub use geoip::{
    City, Continent, Country, GeoRecord, IpLookup, Location, OverrideRecord, Postal,
    RepresentedCountry, Subdivision, Traits,
};
pub use ledger::{LedgerEntry, VersionLedger};
pub use service::GeoService;
pub use watcher::{RecheckOutcome, ReloadWatcher};
pub use writer::{CatchUpOutcome, OverrideWriter, PublishLock, PublishOutcome, WriterState};
