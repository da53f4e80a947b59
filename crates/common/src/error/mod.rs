//! Common error classification shared by every Porter error type
//!
//! Subsystem errors (`HttpError`, `SchedulerError`, ...) stay in their own
//! modules and implement [`ErrorClassification`] so callers can make retry,
//! alerting and logging decisions without matching on concrete variants.
//!
//! ## ErrorSeverity Levels
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Informational, expected conditions | Resource not found, cancelled call |
//! | **Warning** | Degraded but operational | Rate limiting, transient upstream failures |
//! | **Error** | Failure requiring attention | Network errors, invalid input, config errors |
//! | **Critical** | System integrity at risk | Invariant violations, key material rejected |
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use porter_common::error::{ErrorClassification, ErrorSeverity};
//!
//! #[derive(Debug)]
//! enum UploadError {
//!     Throttled(Duration),
//!     Rejected,
//! }
//!
//! impl ErrorClassification for UploadError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, Self::Throttled(_))
//!     }
//!
//!     fn severity(&self) -> ErrorSeverity {
//!         match self {
//!             Self::Throttled(_) => ErrorSeverity::Warning,
//!             Self::Rejected => ErrorSeverity::Error,
//!         }
//!     }
//!
//!     fn retry_after(&self) -> Option<Duration> {
//!         match self {
//!             Self::Throttled(delay) => Some(*delay),
//!             Self::Rejected => None,
//!         }
//!     }
//! }
//!
//! let err = UploadError::Throttled(Duration::from_secs(1));
//! assert!(err.is_retryable());
//! assert!(!err.is_critical());
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unified severity level for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected condition, informational only
    Info,
    /// Degraded but operational
    Warning,
    /// Failure requiring attention
    Error,
    /// System integrity at risk
    Critical,
}

impl ErrorSeverity {
    /// Stable lowercase label suitable for log fields and metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard interface for classifying errors by their characteristics
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again, such as connection resets or upstream unavailability.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ErrorSeverity);

    impl ErrorClassification for Fixed {
        fn is_retryable(&self) -> bool {
            false
        }

        fn severity(&self) -> ErrorSeverity {
            self.0
        }
    }

    #[test]
    fn critical_follows_severity_by_default() {
        assert!(Fixed(ErrorSeverity::Critical).is_critical());
        assert!(!Fixed(ErrorSeverity::Error).is_critical());
        assert_eq!(Fixed(ErrorSeverity::Info).retry_after(), None);
    }

    #[test]
    fn severity_orders_from_info_to_critical() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::Warning.to_string(), "warning");
    }
}
