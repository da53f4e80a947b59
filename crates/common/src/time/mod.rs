//! Time utilities
//!
//! - **[`duration`]**: human duration strings (`"500ms"`, `"1m 30s"`)
//! - **[`schedule`]**: the `every 5 hours` / `monday 09:00` schedule grammar
//!   and next-run arithmetic
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use porter_common::time::{parse_duration_ms, Schedule, TimeUnit};
//!
//! assert_eq!(parse_duration_ms("2m").unwrap(), Duration::from_secs(120));
//!
//! let schedule = Schedule::parse("every 5 hours").unwrap();
//! assert_eq!(schedule.interval(), 5);
//! assert_eq!(schedule.unit(), TimeUnit::Hours);
//! ```

pub mod duration;
pub mod schedule;

// Re-export commonly used items
pub use duration::{format_duration, parse_duration_ms, DurationParseError};
pub use schedule::{Schedule, ScheduleError, TimeUnit};
