//! Geolocation database codec interface.
//!
//! The engine never looks inside the database file. It consumes two narrow
//! traits: [`GeoCodec`] to decode a file into a queryable handle, and
//! [`GeoCodecWriter`] to load a mutable working copy, upsert host records and
//! serialize the result. [`TableCodec`] is the implementation shipped with the
//! crate.

mod network;
mod table;

use std::io::Write;
use std::net::IpAddr;
use std::path::Path;

use crate::error_handling::CodecError;
use crate::geoip::GeoRecord;

pub use network::Network;
pub use table::{RecordTable, TableBuilder, TableCodec};

/// Decodes database files into read-only handles.
pub trait GeoCodec: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn CodecHandle>, CodecError>;
}

/// A decoded, read-only database.
///
/// Resources are released when the handle is dropped. `close` is called by the
/// snapshot that owns the handle right before it is dropped.
pub trait CodecHandle: Send + Sync {
    /// Returns the record of the most specific network containing `ip`.
    fn query(&self, ip: IpAddr) -> Result<Option<GeoRecord>, CodecError>;

    fn close(&self) {}
}

/// Loads mutable working copies of database files.
pub trait GeoCodecWriter: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn WriterHandle>, CodecError>;
}

/// A mutable working copy of a database.
pub trait WriterHandle: Send {
    /// Stores `mutator(existing)` at `network`. `existing` is the record that
    /// currently answers for the network's address, if any.
    fn upsert_facets(
        &mut self,
        network: Network,
        mutator: &mut dyn FnMut(Option<GeoRecord>) -> GeoRecord,
    ) -> Result<(), CodecError>;

    fn serialize(&self, sink: &mut dyn Write) -> Result<(), CodecError>;
}
