//! Error handling and engine statistics.
//!
//! This module provides:
//! - Error type definitions, one enum per failure domain
//! - Engine event counters shared across components
//!
//! Errors are grouped by how far they travel:
//! - **Startup**: the service refuses to start
//! - **Request**: returned to the caller of one lookup or update
//! - **Watcher**: logged and counted, never surfaced to lookups

mod stats;
mod types;

// Re-export public API
pub use stats::EngineStats;
pub use types::{
    ApplyError, CodecError, ConfigError, EngineEvent, InitializationError, LedgerError,
    LookupError, MergeError, PublishError, StartupError, UpdateError, WatchError,
};

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_engine_stats_initialization() {
        let stats = EngineStats::new();
        for event in EngineEvent::iter() {
            assert_eq!(stats.count(event), 0);
        }
        assert!(stats.snapshot().is_empty());
    }

    #[test]
    fn test_engine_stats_increment() {
        let stats = EngineStats::new();
        stats.increment(EngineEvent::SnapshotSwapped);
        stats.increment(EngineEvent::SnapshotSwapped);
        stats.add(EngineEvent::EntriesReplayed, 5);

        assert_eq!(stats.count(EngineEvent::SnapshotSwapped), 2);
        assert_eq!(stats.count(EngineEvent::EntriesReplayed), 5);
        assert_eq!(stats.count(EngineEvent::UpdateFailed), 0);
    }

    #[test]
    fn test_engine_stats_snapshot_skips_zero_counters() {
        let stats = EngineStats::new();
        stats.increment(EngineEvent::WatcherError);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot, vec![(EngineEvent::WatcherError, 1)]);
    }

    #[test]
    fn test_engine_stats_concurrent_increments() {
        use std::sync::Arc;

        let stats = Arc::new(EngineStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        stats.increment(EngineEvent::LookupServed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.count(EngineEvent::LookupServed), 1000);
    }
}
