//! Geolocation records and the snapshot store that serves them.
//!
//! The store keeps one decoded database (a [`Snapshot`]) active at a time and
//! replaces it wholesale when a new version is published, without blocking
//! lookups.

mod store;
mod types;

pub use store::{Snapshot, SnapshotStore};
pub use types::{
    parse_host, City, Continent, Country, GeoRecord, IpLookup, Location, Names, OverrideRecord,
    Postal, RepresentedCountry, Subdivision, Traits,
};
