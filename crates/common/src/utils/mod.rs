//! Common utility functions
//!
//! - **[`serde`]**: serialization helpers for durations in config files

pub mod serde;

// Re-export commonly used items for convenience
pub use self::serde::{duration_str, option_duration_str};
