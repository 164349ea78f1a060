//! Ledger entry file names.
//!
//! `history__<secs>__<seq>__<ip>.json`, with `secs` zero-padded to ten digits
//! and `seq` to four, so that lexical order is chronological order.

use std::fmt;

use crate::config::{
    HISTORY_EXTENSION, HISTORY_PREFIX, HISTORY_SEPARATOR, HISTORY_SEQ_WIDTH, HISTORY_TS_WIDTH,
    MERGED_PREFIX, TEMP_SUFFIX,
};

/// The parsed form of a per-call entry name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct EntryName {
    pub secs: u64,
    pub seq: u32,
    pub ip: String,
}

impl EntryName {
    pub fn new(secs: u64, seq: u32, ip: &str) -> Self {
        EntryName {
            secs,
            seq,
            ip: ip.replace(':', "-"),
        }
    }

    /// Parses a per-call entry name. Merged and temporary names return `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(HISTORY_EXTENSION)?;
        let mut parts = stem.splitn(4, HISTORY_SEPARATOR);
        if parts.next()? != HISTORY_PREFIX {
            return None;
        }
        let secs = parts.next()?;
        let seq = parts.next()?;
        let ip = parts.next()?;
        if secs.len() != HISTORY_TS_WIDTH || seq.len() != HISTORY_SEQ_WIDTH || ip.is_empty() {
            return None;
        }
        if !secs.bytes().chain(seq.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(EntryName {
            secs: secs.parse().ok()?,
            seq: seq.parse().ok()?,
            ip: ip.to_string(),
        })
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{prefix}{sep}{secs:0tw$}{sep}{seq:0sw$}{sep}{ip}{ext}",
            prefix = HISTORY_PREFIX,
            sep = HISTORY_SEPARATOR,
            secs = self.secs,
            seq = self.seq,
            ip = self.ip,
            ext = HISTORY_EXTENSION,
            tw = HISTORY_TS_WIDTH,
            sw = HISTORY_SEQ_WIDTH,
        )
    }
}

/// Picks the name for a new entry appended at wall-clock `now_secs`.
///
/// `newest` is the greatest existing name (entries or checkpoint). The new
/// name never sorts before it, even if the clock went backwards. A full
/// sequence carries into the next second.
pub(crate) fn next_entry_name(now_secs: u64, newest: Option<&EntryName>, ip: &str) -> EntryName {
    match newest {
        Some(newest) if newest.secs >= now_secs => {
            if newest.seq >= MAX_SEQ {
                EntryName::new(newest.secs + 1, 0, ip)
            } else {
                EntryName::new(newest.secs, newest.seq + 1, ip)
            }
        }
        _ => EntryName::new(now_secs, 0, ip),
    }
}

/// Largest sequence number that fits in `HISTORY_SEQ_WIDTH` digits.
const MAX_SEQ: u32 = 10u32.pow(HISTORY_SEQ_WIDTH as u32) - 1;

/// True for names listed as ledger entries.
pub(crate) fn is_entry_file(name: &str) -> bool {
    name.starts_with(HISTORY_PREFIX)
        && name.ends_with(HISTORY_EXTENSION)
        && !name.ends_with(TEMP_SUFFIX)
}

pub(crate) fn merged_file_name(entry_name: &str) -> String {
    format!("{MERGED_PREFIX}{entry_name}")
}

/// Rejects names that could escape the histories directory.
pub(crate) fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_format_and_parse() {
        let name = EntryName::new(1_700_000_000, 3, "1.2.3.4");
        let text = name.to_string();
        assert_eq!(text, "history__1700000000__0003__1.2.3.4.json");
        assert_eq!(EntryName::parse(&text), Some(name));
    }

    #[test]
    fn test_ipv6_colons_are_replaced() {
        let name = EntryName::new(1, 0, "2001:db8::1");
        assert_eq!(name.to_string(), "history__0000000001__0000__2001-db8--1.json");
        assert!(!name.to_string().contains(':'));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        for name in [
            "merged_history__1700000000__0000__1.2.3.4.json",
            "history__1700000000__1.2.3.4.json",
            "history__170000000__0000__1.2.3.4.json",
            "history__1700000000__0000__1.2.3.4.json.tmp",
            "history__17000000x0__0000__1.2.3.4.json",
            "version",
        ] {
            assert!(EntryName::parse(name).is_none(), "{name}");
        }
    }

    #[test]
    fn test_next_name_within_same_second() {
        let first = next_entry_name(100, None, "1.1.1.1");
        let second = next_entry_name(100, Some(&first), "1.1.1.1");
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert!(first.to_string() < second.to_string());
    }

    #[test]
    fn test_next_name_when_clock_steps_back() {
        let newest = EntryName::new(200, 5, "9.9.9.9");
        let next = next_entry_name(150, Some(&newest), "1.1.1.1");
        assert_eq!(next.secs, 200);
        assert_eq!(next.seq, 6);
        assert!(newest.to_string() < next.to_string());
    }

    #[test]
    fn test_full_sequence_carries_into_next_second() {
        let newest = EntryName::new(200, 9999, "9.9.9.9");
        let next = next_entry_name(150, Some(&newest), "1.1.1.1");
        assert_eq!((next.secs, next.seq), (201, 0));
        assert!(newest.to_string() < next.to_string());
        assert_eq!(EntryName::parse(&next.to_string()), Some(next));
    }

    #[test]
    fn test_is_entry_file() {
        assert!(is_entry_file("history__0000000001__0000__1.2.3.4.json"));
        assert!(!is_entry_file("merged_history__0000000001__0000__1.2.3.4.json"));
        assert!(!is_entry_file("history__0000000001__0000__1.2.3.4.json.tmp"));
    }

    proptest! {
        #[test]
        fn prop_lexical_order_is_append_order(
            clock in proptest::collection::vec(0u64..5_000_000_000, 1..40),
            ips in proptest::collection::vec("[0-9a-f:.]{1,20}", 40),
            start in proptest::option::of((0u64..5_000_000_000, 9_980u32..=9_999)),
        ) {
            let mut newest = start.map(|(secs, seq)| EntryName::new(secs, seq, "0.0.0.0"));
            let mut names: Vec<String> = newest.iter().map(|n| n.to_string()).collect();
            for (now, ip) in clock.iter().zip(ips.iter()) {
                let name = next_entry_name(*now, newest.as_ref(), ip);
                let text = name.to_string();
                let parsed = EntryName::parse(&text);
                prop_assert_eq!(parsed.as_ref(), Some(&name));
                names.push(text);
                newest = Some(name);
            }
            let mut sorted = names.clone();
            sorted.sort();
            prop_assert_eq!(sorted, names);
        }
    }
}
