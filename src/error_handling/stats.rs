//! Engine statistics tracking.
//!
//! Thread-safe counters for lookup, update, swap and watcher events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum::IntoEnumIterator;

use super::types::EngineEvent;

/// Thread-safe engine statistics tracker.
///
/// Every [`EngineEvent`] gets an atomic counter at construction, so the map is
/// never written after `new()` and can be shared through an `Arc` by the store,
/// the writer and the watcher.
#[derive(Debug)]
pub struct EngineStats {
    events: HashMap<EngineEvent, AtomicUsize>,
}

impl EngineStats {
    pub fn new() -> Self {
        let mut events = HashMap::new();
        for event in EngineEvent::iter() {
            events.insert(event, AtomicUsize::new(0));
        }
        EngineStats { events }
    }

    /// Increment an event counter.
    pub fn increment(&self, event: EngineEvent) {
        self.add(event, 1);
    }

    /// Add `n` to an event counter.
    pub fn add(&self, event: EngineEvent, n: usize) {
        if let Some(counter) = self.events.get(&event) {
            counter.fetch_add(n, Ordering::Relaxed);
        } else {
            log::error!(
                "Attempted to increment counter for {:?} which is not in the map. \
                 This indicates a bug in EngineStats initialization.",
                event
            );
        }
    }

    /// Get the count for an event.
    pub fn count(&self, event: EngineEvent) -> usize {
        self.events
            .get(&event)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Non-zero counters in declaration order, for logging.
    pub fn snapshot(&self) -> Vec<(EngineEvent, usize)> {
        EngineEvent::iter()
            .map(|event| (event, self.count(event)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}
