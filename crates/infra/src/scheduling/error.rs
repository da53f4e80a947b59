//! Scheduler error types

use std::time::Duration;

use porter_common::error::{ErrorClassification, ErrorSeverity};
use porter_common::ScheduleError;
use porter_domain::PorterError;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::InfraError;

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler is already running
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler not running")]
    NotRunning,

    /// Schedule phrase rejected by the grammar
    #[error(transparent)]
    InvalidSchedule(#[from] ScheduleError),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Task already registered: {0}")]
    DuplicateTask(Uuid),

    /// Operation timed out
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Task join failed
    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

impl ErrorClassification for SchedulerError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::AlreadyRunning | Self::NotRunning => ErrorSeverity::Info,
            Self::Timeout { .. } | Self::TaskJoinFailed(_) => ErrorSeverity::Error,
            _ => ErrorSeverity::Warning,
        }
    }
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        let porter_err = match err {
            SchedulerError::AlreadyRunning
            | SchedulerError::NotRunning
            | SchedulerError::InvalidSchedule(_)
            | SchedulerError::DuplicateTask(_) => PorterError::InvalidInput(err.to_string()),
            SchedulerError::TaskNotFound(_) => PorterError::NotFound(err.to_string()),
            _ => PorterError::Internal(err.to_string()),
        };
        InfraError(porter_err)
    }
}

impl From<SchedulerError> for PorterError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Convenience type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
