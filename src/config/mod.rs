//! Engine configuration and constants.
//!
//! This module provides:
//! - Layout and format constants (file names, prefixes, codec magic)
//! - The [`Config`] value passed to every component constructor

mod constants;
mod types;

// Re-export all constants
pub use constants::*;
pub use types::{Config, LogFormat, LogLevel};
