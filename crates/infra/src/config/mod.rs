//! Configuration loading
//!
//! Reads the named-client file that feeds [`crate::http::ClientFactory`].

pub mod loader;

// Re-export commonly used items
pub use loader::{load, load_from_file, parse_config, probe_config_paths};
