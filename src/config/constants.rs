//! Configuration constants.
//!
//! File names, prefixes and format markers shared by the ledger, the codec and
//! the watcher. The on-disk layout matches the one older deployments already
//! have under `data/`.

use std::time::Duration;

/// Default data directory (relative to the working directory)
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default canonical database file name
pub const DEFAULT_DATABASE_NAME: &str = "GeoLite2-City.mmdb";

/// Checkpoint file name, relative to the data directory
pub const VERSION_FILE_NAME: &str = "version";

/// Directory holding the canonical database, relative to the data directory
pub const DATABASE_DIR_NAME: &str = "db";

/// Directory holding ledger entries, relative to the data directory
pub const HISTORIES_DIR_NAME: &str = "histories";

/// Prefix of per-call ledger entries
pub const HISTORY_PREFIX: &str = "history";

/// Separator between the parts of a ledger entry name
pub const HISTORY_SEPARATOR: &str = "__";

/// Extension of ledger entries
pub const HISTORY_EXTENSION: &str = ".json";

/// Prefix of merged ledger entries
pub const MERGED_PREFIX: &str = "merged_";

/// Suffix of temporary files written before an atomic rename.
/// Temp files never match the ledger listing pattern.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Width of the per-second sequence number in entry names
pub const HISTORY_SEQ_WIDTH: usize = 4;

/// Width of the unix timestamp in entry names (valid until year 2286)
pub const HISTORY_TS_WIDTH: usize = 10;

/// Magic bytes at the start of a record table database
pub const TABLE_MAGIC: &[u8; 8] = b"GEOTABLE";

/// Current record table format version
pub const TABLE_FORMAT_VERSION: u32 = 1;

/// How long shutdown waits for in-flight lookups before closing anyway
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
