//! Retry policy
//!
//! [`Policy::should_retry`] classifies the outcome of one attempt. The
//! order of checks matters:
//!
//! 1. Transport error: cancelled, deadline, retry budget, non-retryable
//!    substring, then the retry function registered under code `0`.
//! 2. Response: `< 400` success, `404` not found, `429` limit-exceeded
//!    (terminal, never retried on the same host), other `4xx`
//!    non-retriable, `5xx` through its retry function when registered.
//!
//! The retry budget counts retries across the whole call: attempt index `n`
//! has already used `n` retries, and any retry branch stops with
//! [`RetryReason::LimitExceeded`] once `n >= total_retry_limit`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use porter_domain::RequestConfig;
use reqwest::StatusCode;

use super::context::RequestContext;

/// Key of the retry function applied to transport errors
pub const TRANSPORT_ERROR_CODE: u16 = 0;

pub const DEFAULT_TOTAL_RETRY_LIMIT: u32 = 5;

/// Default non-retryable transport error substrings
pub const DEFAULT_NON_RETRYABLE: &[&str] = &[
    "no such host",
    "TLS handshake error",
    "certificate signed by unknown authority",
    "client didn't provide a certificate",
    "tls: bad certificate",
    "x509: certificate",
    "x509: cannot validate certificate",
    "server gave HTTP response to HTTPS client",
    "dial tcp: lookup",
    "peer reset",
    // resolver and rustls phrasing
    "dns error",
    "failed to lookup address",
    "invalid peer certificate",
    "UnknownIssuer",
];

/// Short tag explaining a retry decision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RetryReason {
    Success,
    NotFound,
    LimitExceeded,
    Deadline,
    Cancelled,
    NonRetriable,
    Connection,
    Gateway,
    Unavailable,
    RateLimit,
    /// Tag supplied by a caller-registered retry function
    Other(Cow<'static, str>),
}

impl RetryReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not-found",
            Self::LimitExceeded => "limit-exceeded",
            Self::Deadline => "deadline",
            Self::Cancelled => "cancelled",
            Self::NonRetriable => "non-retriable",
            Self::Connection => "connection",
            Self::Gateway => "gateway",
            Self::Unavailable => "unavailable",
            Self::RateLimit => "rate-limit",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether to retry, how long to wait first, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub sleep: Duration,
    pub reason: RetryReason,
}

impl RetryDecision {
    pub fn stop(reason: RetryReason) -> Self {
        Self { retry: false, sleep: Duration::ZERO, reason }
    }

    pub fn retry_after(sleep: Duration, reason: RetryReason) -> Self {
        Self { retry: true, sleep, reason }
    }
}

/// Per-status retry function, called with the number of retries used so far
pub type RetryFn = Arc<dyn Fn(u32) -> RetryDecision + Send + Sync>;

/// Retry `retries` times with a fixed `sleep`, then stop with
/// [`RetryReason::LimitExceeded`].
pub fn retry_up_to(retries: u32, sleep: Duration, reason: RetryReason) -> RetryFn {
    Arc::new(move |used| {
        if used < retries {
            RetryDecision::retry_after(sleep, reason.clone())
        } else {
            RetryDecision::stop(RetryReason::LimitExceeded)
        }
    })
}

/// What a single attempt produced
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    /// Transport failure, with the flattened error message
    Transport(&'a str),
    Response(StatusCode),
}

#[derive(Clone)]
pub struct Policy {
    retry_fns: HashMap<u16, RetryFn>,
    total_retry_limit: u32,
    request_timeout: Option<Duration>,
    non_retryable: Vec<String>,
}

impl Default for Policy {
    fn default() -> Self {
        let mut retry_fns = HashMap::new();
        retry_fns.insert(
            TRANSPORT_ERROR_CODE,
            retry_up_to(3, Duration::from_secs(2), RetryReason::Connection),
        );
        retry_fns.insert(502, retry_up_to(5, Duration::from_secs(1), RetryReason::Gateway));
        retry_fns.insert(503, retry_up_to(5, Duration::from_secs(1), RetryReason::Unavailable));

        Self {
            retry_fns,
            total_retry_limit: DEFAULT_TOTAL_RETRY_LIMIT,
            request_timeout: None,
            non_retryable: DEFAULT_NON_RETRYABLE.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<_> = self.retry_fns.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("Policy")
            .field("retry_codes", &codes)
            .field("total_retry_limit", &self.total_retry_limit)
            .field("request_timeout", &self.request_timeout)
            .field("non_retryable", &self.non_retryable.len())
            .finish()
    }
}

impl Policy {
    /// Default policy with `retry_limit` and `timeout` overrides applied.
    pub fn from_config(config: &RequestConfig) -> Self {
        let mut policy = Self::default();
        if let Some(limit) = config.retry_limit {
            policy.total_retry_limit = limit;
        }
        if let Some(timeout) = config.timeout {
            policy.request_timeout = Some(timeout);
        }
        policy
    }

    pub fn with_total_retry_limit(mut self, limit: u32) -> Self {
        self.total_retry_limit = limit;
        self
    }

    /// Timeout for the whole logical call, applied when the caller set no
    /// deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Register or replace the retry function for `status`
    /// ([`TRANSPORT_ERROR_CODE`] for transport errors).
    pub fn with_retry_fn(mut self, status: u16, retry_fn: RetryFn) -> Self {
        self.retry_fns.insert(status, retry_fn);
        self
    }

    /// Remove the retry function for `status`. The transport entry cannot be
    /// removed; it is replaced by one that never retries.
    pub fn without_retry_fn(mut self, status: u16) -> Self {
        if status == TRANSPORT_ERROR_CODE {
            self.retry_fns.insert(
                TRANSPORT_ERROR_CODE,
                Arc::new(|_| RetryDecision::stop(RetryReason::NonRetriable)),
            );
        } else {
            self.retry_fns.remove(&status);
        }
        self
    }

    pub fn with_non_retryable(mut self, substring: impl Into<String>) -> Self {
        self.non_retryable.push(substring.into());
        self
    }

    pub fn total_retry_limit(&self) -> u32 {
        self.total_retry_limit
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn has_retry_fn(&self, status: u16) -> bool {
        self.retry_fns.contains_key(&status)
    }

    /// Classify one attempt. `retries` is the zero-based attempt index.
    pub fn should_retry(
        &self,
        ctx: &RequestContext,
        retries: u32,
        outcome: Outcome<'_>,
    ) -> RetryDecision {
        match outcome {
            Outcome::Transport(message) => self.classify_transport(ctx, retries, message),
            Outcome::Response(status) => self.classify_response(ctx, retries, status),
        }
    }

    fn classify_transport(&self, ctx: &RequestContext, retries: u32, message: &str) -> RetryDecision {
        if let Some(stop) = context_stop(ctx) {
            return stop;
        }
        if retries >= self.total_retry_limit {
            return RetryDecision::stop(RetryReason::LimitExceeded);
        }
        if self.non_retryable.iter().any(|s| message.contains(s.as_str())) {
            return RetryDecision::stop(RetryReason::NonRetriable);
        }
        self.apply(TRANSPORT_ERROR_CODE, retries)
            .unwrap_or_else(|| RetryDecision::stop(RetryReason::NonRetriable))
    }

    fn classify_response(
        &self,
        ctx: &RequestContext,
        retries: u32,
        status: StatusCode,
    ) -> RetryDecision {
        let code = status.as_u16();
        if code < 400 {
            return RetryDecision::stop(RetryReason::Success);
        }
        if let Some(stop) = context_stop(ctx) {
            return stop;
        }

        match code {
            404 => RetryDecision::stop(RetryReason::NotFound),
            429 => RetryDecision::stop(RetryReason::LimitExceeded),
            400..=499 => RetryDecision::stop(RetryReason::NonRetriable),
            _ => self
                .apply_within_budget(code, retries)
                .unwrap_or_else(|| RetryDecision::stop(RetryReason::NonRetriable)),
        }
    }

    /// `None` when no function is registered for `code`.
    fn apply_within_budget(&self, code: u16, retries: u32) -> Option<RetryDecision> {
        if !self.retry_fns.contains_key(&code) {
            return None;
        }
        if retries >= self.total_retry_limit {
            return Some(RetryDecision::stop(RetryReason::LimitExceeded));
        }
        self.apply(code, retries)
    }

    fn apply(&self, code: u16, retries: u32) -> Option<RetryDecision> {
        let decision = (self.retry_fns.get(&code)?)(retries);
        Some(if decision.retry { decision } else { RetryDecision { sleep: Duration::ZERO, ..decision } })
    }
}

fn context_stop(ctx: &RequestContext) -> Option<RetryDecision> {
    if ctx.is_cancelled() {
        Some(RetryDecision::stop(RetryReason::Cancelled))
    } else if ctx.deadline_exceeded() {
        Some(RetryDecision::stop(RetryReason::Deadline))
    } else {
        None
    }
}
