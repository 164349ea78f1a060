//! Process-level initialization.
//!
//! Logging is the only process-wide resource the engine sets up; everything
//! else is owned by [`crate::GeoService`].

mod logger;

// Re-export public API
pub use logger::{init_logger, init_logger_with};
