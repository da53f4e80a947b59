//! # Porter Domain
//!
//! Shared domain types for the Porter workspace.
//!
//! This crate contains:
//! - The workspace-wide error type and Result alias
//! - Serde configuration structures for HTTP clients
//! - Header names, file names and other protocol constants
//!
//! ## Architecture
//! - Depends only on the pure `foundation` tier of `porter-common`
//! - No I/O

pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
