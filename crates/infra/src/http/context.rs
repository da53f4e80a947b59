//! Per-call operation context
//!
//! A [`RequestContext`] travels with one logical call. It carries the
//! cancellation token, an optional deadline, call-scoped header overrides
//! and the correlation id. Every suspension point of the retry client goes
//! through [`RequestContext::run`], so cancellation and deadlines are
//! honoured while waiting on the transport, while sleeping between
//! attempts, and while draining response bodies.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::HttpError;

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    headers: HeaderMap,
    correlation_id: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the call to an external cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set or replace a header for this call only.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Like [`with_header`](Self::with_header) for string input.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidRequest`] for an invalid name or value.
    pub fn try_with_header(self, name: &str, value: &str) -> Result<Self, HttpError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HttpError::InvalidRequest(format!("header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HttpError::InvalidRequest(format!("header value for '{name}': {e}")))?;
        Ok(self.with_header(name, value))
    }

    /// Merge a header map into the call-scoped headers, replacing duplicates.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Copy the listed headers from an inbound request onto this context.
    ///
    /// Names missing from `inbound` are skipped. Multi-valued headers keep
    /// every value.
    pub fn with_inbound_headers(mut self, inbound: &HeaderMap, names: &[&str]) -> Self {
        for name in names {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            let mut values = inbound.get_all(&name).iter().cloned();
            if let Some(first) = values.next() {
                self.headers.insert(name.clone(), first);
                for value in values {
                    self.headers.append(name.clone(), value);
                }
            }
        }
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the call and every clone of this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Apply `timeout` as the call deadline unless one is already set.
    pub(crate) fn with_default_timeout(&self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) if !timeout.is_zero() => self.clone().with_timeout(timeout),
            _ => self.clone(),
        }
    }

    /// Race `fut` against cancellation and the deadline.
    ///
    /// # Errors
    /// [`HttpError::Cancelled`] or [`HttpError::DeadlineExceeded`] when either
    /// fires first; `fut` is dropped.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, HttpError> {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(HttpError::Cancelled),
            () = deadline => Err(HttpError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }

    /// Sleep unless the context ends first.
    pub(crate) async fn sleep(&self, duration: Duration) -> Result<(), HttpError> {
        if duration.is_zero() {
            return Ok(());
        }
        self.run(tokio::time::sleep(duration)).await
    }
}
