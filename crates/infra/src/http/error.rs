//! Retry client error types
//!
//! Every failed call carries enough to rebuild the `(headers, status, error)`
//! triple: [`HttpError::status`] and [`HttpError::headers`] return the
//! response metadata when the failure came from a server response.

use std::fmt;
use std::time::Duration;

use porter_common::error::{ErrorClassification, ErrorSeverity};
use porter_domain::PorterError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use thiserror::Error;

use super::decode::ApiErrorBody;
use super::policy::RetryReason;
use crate::errors::InfraError;

/// One host's failure inside a failover call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailure {
    pub host: String,
    pub method: Method,
    pub path: String,
    /// Status text (`503 Service Unavailable`) or the transport error message
    pub detail: String,
}

impl fmt::Display for HostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}: {}", self.method, self.host, self.path, self.detail)
    }
}

/// Retry client errors
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("transport error ({reason}): {message}")]
    Transport { message: String, reason: RetryReason },

    /// Error status whose body was not a structured error object
    #[error("{status}: {body}")]
    Status { status: StatusCode, headers: HeaderMap, body: String, reason: RetryReason },

    /// Error status with a decoded `{code, message}` body
    #[error("{status}: {} {}", body.code, body.message)]
    Api { status: StatusCode, headers: HeaderMap, body: ApiErrorBody, reason: RetryReason },

    #[error("all hosts failed: {}", join_failures(failures))]
    AllHostsFailed {
        failures: Vec<HostFailure>,
        /// Status and headers of the last host, when it answered
        status: Option<StatusCode>,
        headers: Option<HeaderMap>,
    },

    #[error("decode response body ({status}): {message}")]
    Decode { status: StatusCode, headers: HeaderMap, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request body: {0}")]
    Body(String),

    #[error("write response body: {0}")]
    Write(#[source] std::io::Error),

    #[error("authorization: {0}")]
    Auth(String),

    #[error("server did not respond with a proper nonce header")]
    MissingNonce,

    #[error("client has no nonce source configured")]
    NonceNotConfigured,

    #[error("client configuration: {0}")]
    Config(String),
}

fn join_failures(failures: &[HostFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl HttpError {
    /// Response status, if the failure came from a server response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } | Self::Api { status, .. } | Self::Decode { status, .. } => {
                Some(*status)
            }
            Self::AllHostsFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Response headers, if the failure came from a server response.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::Status { headers, .. } | Self::Api { headers, .. } | Self::Decode { headers, .. } => {
                Some(headers)
            }
            Self::AllHostsFailed { headers, .. } => headers.as_ref(),
            _ => None,
        }
    }

    /// Policy reason that ended the call, when one applies.
    pub fn reason(&self) -> Option<RetryReason> {
        match self {
            Self::Cancelled => Some(RetryReason::Cancelled),
            Self::DeadlineExceeded => Some(RetryReason::Deadline),
            Self::Transport { reason, .. } | Self::Status { reason, .. } | Self::Api { reason, .. } => {
                Some(reason.clone())
            }
            _ => None,
        }
    }

    /// The decoded error object, for [`HttpError::Api`].
    pub fn api_body(&self) -> Option<&ApiErrorBody> {
        match self {
            Self::Api { body, .. } => Some(body),
            _ => None,
        }
    }

    pub(crate) fn from_context(reason: &RetryReason) -> Option<Self> {
        match reason {
            RetryReason::Cancelled => Some(Self::Cancelled),
            RetryReason::Deadline => Some(Self::DeadlineExceeded),
            _ => None,
        }
    }
}

impl ErrorClassification for HttpError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { reason, .. } => !matches!(reason, RetryReason::NonRetriable),
            Self::DeadlineExceeded | Self::MissingNonce | Self::AllHostsFailed { .. } => true,
            _ => self.status().is_some_and(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled => ErrorSeverity::Info,
            Self::Status { status, .. } | Self::Api { status, .. } if *status == StatusCode::NOT_FOUND => {
                ErrorSeverity::Info
            }
            Self::Status { status, .. } | Self::Api { status, .. }
                if *status == StatusCode::TOO_MANY_REQUESTS =>
            {
                ErrorSeverity::Warning
            }
            Self::DeadlineExceeded | Self::MissingNonce => ErrorSeverity::Warning,
            Self::Auth(_) | Self::Config(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// `Retry-After` in delta-seconds form, when the server sent one.
    fn retry_after(&self) -> Option<Duration> {
        self.headers()?
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

impl From<HttpError> for InfraError {
    fn from(err: HttpError) -> Self {
        let message = err.to_string();
        let porter = match &err {
            HttpError::Cancelled => PorterError::Cancelled(message),
            HttpError::Auth(_) => PorterError::Auth(message),
            HttpError::Config(_) => PorterError::Config(message),
            HttpError::InvalidRequest(_) | HttpError::Body(_) => PorterError::InvalidInput(message),
            _ if err.status() == Some(StatusCode::NOT_FOUND) => PorterError::NotFound(message),
            _ if matches!(err.status(), Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)) => {
                PorterError::Auth(message)
            }
            _ => PorterError::Network(message),
        };
        InfraError(porter)
    }
}

impl From<HttpError> for PorterError {
    fn from(err: HttpError) -> Self {
        InfraError::from(err).into()
    }
}
