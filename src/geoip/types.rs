//! Geolocation data structures.
//!
//! [`GeoRecord`] is both the stored record and the partial record carried by an
//! override: every facet is optional, and a facet that is present replaces the
//! stored facet as a whole.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Locale code → localized name. Ordered so encodings are deterministic.
pub type Names = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Continent {
    pub code: Option<String>,
    pub names: Names,
}

/// Used for both `country` and `registered_country`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Country {
    pub iso_code: Option<String>,
    pub names: Names,
    pub is_in_european_union: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepresentedCountry {
    pub iso_code: Option<String>,
    pub names: Names,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub is_in_european_union: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subdivision {
    pub iso_code: Option<String>,
    pub names: Names,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_radius: Option<u16>,
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Postal {
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct City {
    pub names: Names,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Traits {
    pub is_anonymous_proxy: Option<bool>,
    pub is_satellite_provider: Option<bool>,
    pub is_anycast: Option<bool>,
}

/// A geolocation record: a set of optional facets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoRecord {
    pub continent: Option<Continent>,
    pub country: Option<Country>,
    pub subdivisions: Option<Vec<Subdivision>>,
    pub location: Option<Location>,
    pub postal: Option<Postal>,
    pub city: Option<City>,
    pub represented_country: Option<RepresentedCountry>,
    pub registered_country: Option<Country>,
    pub traits: Option<Traits>,
}

impl GeoRecord {
    /// True when no facet is present.
    pub fn is_empty(&self) -> bool {
        *self == GeoRecord::default()
    }

    /// Replaces every facet present in `patch`. Absent facets are left alone;
    /// present facets are never merged field by field, even when empty.
    pub fn replace_facets(&mut self, patch: &GeoRecord) {
        fn replace<T: Clone>(slot: &mut Option<T>, patch: &Option<T>) {
            if let Some(value) = patch {
                *slot = Some(value.clone());
            }
        }

        replace(&mut self.continent, &patch.continent);
        replace(&mut self.country, &patch.country);
        replace(&mut self.subdivisions, &patch.subdivisions);
        replace(&mut self.location, &patch.location);
        replace(&mut self.postal, &patch.postal);
        replace(&mut self.city, &patch.city);
        replace(&mut self.represented_country, &patch.represented_country);
        replace(&mut self.registered_country, &patch.registered_country);
        replace(&mut self.traits, &patch.traits);
    }
}

/// A point override: facets to replace on the record of one host address.
///
/// Serialized flat, the way update requests arrive:
/// `{"ip": "1.2.3.4", "country": {"iso_code": "US"}, "city": null}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub ip: String,
    #[serde(flatten)]
    pub fields: GeoRecord,
}

impl OverrideRecord {
    pub fn new(ip: impl Into<String>, fields: GeoRecord) -> Self {
        OverrideRecord {
            ip: ip.into(),
            fields,
        }
    }

    /// The host this override targets, or `None` when `ip` is not a single
    /// address (ranges and CIDR notation are rejected).
    pub fn host(&self) -> Option<IpAddr> {
        parse_host(&self.ip)
    }
}

/// Parses a single host address, ignoring surrounding whitespace.
pub fn parse_host(ip: &str) -> Option<IpAddr> {
    ip.trim().parse().ok()
}

/// One answered lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpLookup {
    pub ip: String,
    /// Version of the snapshot that answered
    pub db_version: String,
    #[serde(flatten)]
    pub record: GeoRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pairs: &[(&str, &str)]) -> Names {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full_record() -> GeoRecord {
        GeoRecord {
            continent: Some(Continent {
                code: Some("EU".into()),
                names: names(&[("en", "Europe")]),
            }),
            country: Some(Country {
                iso_code: Some("FR".into()),
                names: names(&[("en", "France"), ("fr", "France")]),
                is_in_european_union: Some(true),
            }),
            subdivisions: Some(vec![Subdivision {
                iso_code: Some("IDF".into()),
                names: names(&[("en", "Île-de-France")]),
            }]),
            location: Some(Location {
                latitude: Some(48.8566),
                longitude: Some(2.3522),
                accuracy_radius: Some(20),
                time_zone: Some("Europe/Paris".into()),
            }),
            postal: Some(Postal {
                code: Some("75001".into()),
            }),
            city: Some(City {
                names: names(&[("en", "Paris")]),
            }),
            represented_country: None,
            registered_country: Some(Country {
                iso_code: Some("FR".into()),
                ..Default::default()
            }),
            traits: Some(Traits::default()),
        }
    }

    #[test]
    fn test_absent_facets_are_untouched() {
        let mut record = full_record();
        let patch = GeoRecord {
            postal: Some(Postal {
                code: Some("69001".into()),
            }),
            ..Default::default()
        };
        record.replace_facets(&patch);

        let mut expected = full_record();
        expected.postal = Some(Postal {
            code: Some("69001".into()),
        });
        assert_eq!(record, expected);
    }

    #[test]
    fn test_present_facet_replaces_wholesale() {
        let mut record = full_record();
        let patch = GeoRecord {
            country: Some(Country {
                iso_code: Some("BE".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        record.replace_facets(&patch);

        let country = record.country.unwrap();
        assert_eq!(country.iso_code.as_deref(), Some("BE"));
        // No field-level merge: the old names and EU flag are gone.
        assert!(country.names.is_empty());
        assert_eq!(country.is_in_european_union, None);
    }

    #[test]
    fn test_empty_facets_still_replace() {
        let mut record = full_record();
        let patch = GeoRecord {
            subdivisions: Some(Vec::new()),
            city: Some(City::default()),
            ..Default::default()
        };
        record.replace_facets(&patch);
        assert_eq!(record.subdivisions, Some(Vec::new()));
        assert_eq!(record.city, Some(City::default()));
        assert!(record.country.is_some());
    }

    #[test]
    fn test_override_json_is_flat() {
        let json = r#"{
            "ip": "1.2.3.4",
            "continent": null,
            "country": {"iso_code": "US", "names": {"en": "United States"}},
            "subdivisions": null,
            "represented_country": {"iso_code": "US", "type": "military"}
        }"#;
        let record: OverrideRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.ip, "1.2.3.4");
        assert_eq!(
            record.fields.country.as_ref().unwrap().names.get("en").map(String::as_str),
            Some("United States")
        );
        assert_eq!(
            record
                .fields
                .represented_country
                .as_ref()
                .unwrap()
                .kind
                .as_deref(),
            Some("military")
        );
        assert!(record.fields.continent.is_none());
        assert!(record.fields.city.is_none());

        let encoded = serde_json::to_value(&record).unwrap();
        assert_eq!(encoded["ip"], "1.2.3.4");
        assert_eq!(encoded["country"]["iso_code"], "US");
        assert!(encoded.get("fields").is_none());
    }

    #[test]
    fn test_host_parsing() {
        assert!(OverrideRecord::new("1.2.3.4", GeoRecord::default())
            .host()
            .is_some());
        assert!(OverrideRecord::new(" 2001:db8::1 ", GeoRecord::default())
            .host()
            .is_some());
        for bad in ["1.2.3.0/24", "1.2.3", "", "example.com", "1.2.3.4-1.2.3.9"] {
            assert!(parse_host(bad).is_none(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_is_empty() {
        assert!(GeoRecord::default().is_empty());
        assert!(!full_record().is_empty());
    }
}
