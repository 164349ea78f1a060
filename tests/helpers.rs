// Shared test helpers for data directory setup and override construction.
//
// This module provides common utilities used across multiple test files to reduce duplication.

use std::path::Path;

use geolize::{
    City, Config, Continent, Country, GeoRecord, Network, OverrideRecord, Postal, TableBuilder,
};
use tempfile::TempDir;

/// Creates a temporary data directory with a base database.
///
/// The base database knows `8.8.8.0/24` and `2001:db8::/32` but nothing about
/// `1.2.3.4`.
#[allow(dead_code)] // Used by other test files
pub fn data_dir_with_base() -> (TempDir, Config) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let config = test_config(dir.path());
    write_base_database(&config);
    (dir, config)
}

/// Configuration for tests: rooted at `dir`, watcher optional.
#[allow(dead_code)] // Used by other test files
pub fn test_config(dir: &Path) -> Config {
    Config {
        require_watcher: false,
        ..Config::with_data_dir(dir)
    }
}

#[allow(dead_code)] // Used by other test files
pub fn write_base_database(config: &Config) {
    TableBuilder::new("GeoLite2-City")
        .insert(
            Network::new("8.8.8.0".parse().unwrap(), 24).unwrap(),
            base_record(),
        )
        .insert(
            Network::new("2001:db8::".parse().unwrap(), 32).unwrap(),
            GeoRecord {
                country: Some(country("DE")),
                ..Default::default()
            },
        )
        .write(config.database_path())
        .expect("Failed to write base database");
}

#[allow(dead_code)] // Used by other test files
pub fn base_record() -> GeoRecord {
    GeoRecord {
        continent: Some(Continent {
            code: Some("NA".into()),
            names: [("en".to_string(), "North America".to_string())].into(),
        }),
        country: Some(country("US")),
        city: Some(City {
            names: [("en".to_string(), "Mountain View".to_string())].into(),
        }),
        postal: Some(Postal {
            code: Some("94043".into()),
        }),
        ..Default::default()
    }
}

#[allow(dead_code)] // Used by other test files
pub fn country(code: &str) -> Country {
    Country {
        iso_code: Some(code.to_string()),
        ..Default::default()
    }
}

/// An override that sets only the country facet.
#[allow(dead_code)] // Used by other test files
pub fn country_override(ip: &str, code: &str) -> OverrideRecord {
    OverrideRecord::new(
        ip,
        GeoRecord {
            country: Some(country(code)),
            ..Default::default()
        },
    )
}

#[allow(dead_code)] // Used by other test files
pub fn database_bytes(config: &Config) -> Vec<u8> {
    std::fs::read(config.database_path()).expect("Failed to read database")
}

#[allow(dead_code)] // Used by other test files
pub fn checkpoint(config: &Config) -> String {
    std::fs::read_to_string(config.version_file()).expect("Failed to read checkpoint")
}

/// Names of files in a directory, sorted.
#[allow(dead_code)] // Used by other test files
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .expect("Failed to list directory")
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
