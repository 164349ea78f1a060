//! Record table codec.
//!
//! File layout:
//!
//! ```text
//! +----------+-------------+-------------------------------------------+
//! | GEOTABLE | version u32 | bincode { database_type, records }        |
//! | 8 bytes  | LE          | records: Network -> GeoRecord, ascending  |
//! +----------+-------------+-------------------------------------------+
//! ```
//!
//! Only ordered collections are encoded and nothing time-dependent is written,
//! so the same table always produces the same bytes. Lookups use longest-prefix
//! match over the stored networks.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::network::Network;
use super::{CodecHandle, GeoCodec, GeoCodecWriter, WriterHandle};
use crate::config::{TABLE_FORMAT_VERSION, TABLE_MAGIC};
use crate::error_handling::CodecError;
use crate::geoip::GeoRecord;

const HEADER_LEN: usize = 8 + 4;

/// Codec for record table databases. Stateless; share it freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableCodec;

impl TableCodec {
    fn read_table(path: &Path) -> Result<RecordTable, CodecError> {
        let bytes = std::fs::read(path)?;
        RecordTable::from_bytes(&bytes, path)
    }
}

impl GeoCodec for TableCodec {
    fn open(&self, path: &Path) -> Result<Box<dyn CodecHandle>, CodecError> {
        let table = Self::read_table(path)?;
        log::debug!(
            "Decoded {} ({} networks, type {:?})",
            path.display(),
            table.len(),
            table.database_type()
        );
        Ok(Box::new(table))
    }
}

impl GeoCodecWriter for TableCodec {
    fn load(&self, path: &Path) -> Result<Box<dyn WriterHandle>, CodecError> {
        Ok(Box::new(Self::read_table(path)?))
    }
}

/// An in-memory record table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordTable {
    database_type: String,
    records: BTreeMap<Network, GeoRecord>,
    /// (is_ipv6, prefix) of every stored network, rebuilt after decoding
    #[serde(skip)]
    prefixes: BTreeSet<(bool, u8)>,
}

impl RecordTable {
    pub fn new(database_type: impl Into<String>) -> Self {
        RecordTable {
            database_type: database_type.into(),
            ..Default::default()
        }
    }

    /// Decodes a table. `path` is only used in error messages.
    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN || &bytes[..TABLE_MAGIC.len()] != TABLE_MAGIC {
            return Err(CodecError::BadMagic(path.to_path_buf()));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[TABLE_MAGIC.len()..HEADER_LEN]);
        let version = u32::from_le_bytes(version);
        if version != TABLE_FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let mut table: RecordTable = bincode::deserialize(&bytes[HEADER_LEN..])?;
        table.prefixes = table
            .records
            .keys()
            .map(|net| (net.addr().is_ipv6(), net.prefix()))
            .collect();
        Ok(table)
    }

    pub fn write_to(&self, sink: &mut dyn Write) -> Result<(), CodecError> {
        sink.write_all(TABLE_MAGIC)?;
        sink.write_all(&TABLE_FORMAT_VERSION.to_le_bytes())?;
        bincode::serialize_into(&mut *sink, self)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    pub fn database_type(&self) -> &str {
        &self.database_type
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record of the most specific network containing `ip`.
    pub fn lookup(&self, ip: IpAddr) -> Option<&GeoRecord> {
        let v6 = ip.is_ipv6();
        self.prefixes
            .range((v6, 0)..=(v6, u8::MAX))
            .rev()
            .find_map(|&(_, prefix)| self.records.get(&Network::masked(ip, prefix)))
    }

    /// The record stored at exactly `network`.
    pub fn get(&self, network: &Network) -> Option<&GeoRecord> {
        self.records.get(network)
    }

    pub fn insert(&mut self, network: Network, record: GeoRecord) {
        self.prefixes
            .insert((network.addr().is_ipv6(), network.prefix()));
        self.records.insert(network, record);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Network, &GeoRecord)> {
        self.records.iter()
    }
}

impl CodecHandle for RecordTable {
    fn query(&self, ip: IpAddr) -> Result<Option<GeoRecord>, CodecError> {
        Ok(self.lookup(ip).cloned())
    }
}

impl WriterHandle for RecordTable {
    fn upsert_facets(
        &mut self,
        network: Network,
        mutator: &mut dyn FnMut(Option<GeoRecord>) -> GeoRecord,
    ) -> Result<(), CodecError> {
        let existing = self.lookup(network.addr()).cloned();
        let record = mutator(existing);
        self.insert(network, record);
        Ok(())
    }

    fn serialize(&self, sink: &mut dyn Write) -> Result<(), CodecError> {
        self.write_to(sink)
    }
}

/// Builds base databases.
///
/// ```no_run
/// use geolize::codec::{Network, TableBuilder};
/// use geolize::geoip::{Country, GeoRecord};
///
/// let record = GeoRecord {
///     country: Some(Country { iso_code: Some("DE".into()), ..Default::default() }),
///     ..Default::default()
/// };
/// TableBuilder::new("GeoLite2-City")
///     .insert(Network::new("5.9.0.0".parse().unwrap(), 16).unwrap(), record)
///     .write("data/db/GeoLite2-City.mmdb")
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct TableBuilder {
    table: RecordTable,
}

impl TableBuilder {
    pub fn new(database_type: impl Into<String>) -> Self {
        TableBuilder {
            table: RecordTable::new(database_type),
        }
    }

    pub fn insert(mut self, network: Network, record: GeoRecord) -> Self {
        self.table.insert(network, record);
        self
    }

    pub fn build(self) -> RecordTable {
        self.table
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        self.table.to_bytes()
    }

    /// Writes the table to `path`, creating parent directories.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), CodecError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}
