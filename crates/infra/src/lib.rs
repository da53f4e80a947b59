//! # Porter Infrastructure
//!
//! Impure building blocks on top of `porter-domain` and `porter-common`.
//!
//! This crate contains:
//! - The retrying, multi-host HTTP client with bearer and DPoP auth
//! - Client configuration loading and the named client factory
//! - The in-process periodic task scheduler
//!
//! ## Architecture
//! - Depends on `porter-domain` for configuration and `PorterError`
//! - Depends on `porter-common` for schedules, bounded stacks and error
//!   classification
//! - Contains all I/O (network, filesystem, environment)

pub mod config;
pub mod errors;
pub mod http;
pub mod scheduling;

// Re-export commonly used items
pub use errors::InfraError;
pub use http::{ClientFactory, HttpClient, HttpClientBuilder, HttpError, RequestContext, Response};
pub use scheduling::{Scheduler, SchedulerError, Task};
