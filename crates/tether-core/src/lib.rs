//! Foundational low-level utilities shared across Tether crates.
//!
//! Provides atomic file-write helpers and time utilities used by credential
//! persistence, session deadlines, and expiry calculations.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, is_expired_ms};
