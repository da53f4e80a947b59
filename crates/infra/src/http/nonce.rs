//! Replay-nonce cache
//!
//! Nonces are harvested from response headers and handed out newest first.
//! When the cache is empty, [`NonceCache::next_with`] refills by issuing a
//! `HEAD` to the configured path. The lock is never held across that
//! request.

use std::future::Future;

use parking_lot::Mutex;
use porter_common::collections::BoundedStack;
use porter_domain::constants::NONCE_CACHE_CAPACITY;
use porter_domain::NonceConfig;
use reqwest::header::{HeaderMap, HeaderName};
use tracing::debug;

use super::error::HttpError;

#[derive(Debug)]
pub struct NonceCache {
    stack: Mutex<BoundedStack<String>>,
    path: String,
    header: HeaderName,
}

impl NonceCache {
    /// # Errors
    /// [`HttpError::Config`] when the header name is invalid.
    pub fn new(config: &NonceConfig) -> Result<Self, HttpError> {
        let header = HeaderName::from_bytes(config.header.trim().as_bytes())
            .map_err(|e| HttpError::Config(format!("nonce header '{}': {e}", config.header)))?;
        Ok(Self {
            stack: Mutex::new(BoundedStack::new(NONCE_CACHE_CAPACITY)),
            path: config.path.clone(),
            header,
        })
    }

    /// Path the refill `HEAD` goes to
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    pub fn push(&self, nonce: impl Into<String>) {
        self.stack.lock().push(nonce.into());
    }

    pub fn pop(&self) -> Option<String> {
        self.stack.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.stack.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.lock().is_empty()
    }

    /// Push the configured header's value, if present and non-empty.
    pub fn set_from_headers(&self, headers: &HeaderMap) {
        if let Some(nonce) = self.extract(headers) {
            self.push(nonce);
        }
    }

    /// Pop a cached nonce, or call `fetch` with the refill path and take the
    /// nonce from the returned headers.
    ///
    /// # Errors
    /// Whatever `fetch` returns, or [`HttpError::MissingNonce`] when the
    /// response carries no nonce.
    pub async fn next_with<F, Fut>(&self, fetch: F) -> Result<String, HttpError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<HeaderMap, HttpError>>,
    {
        if let Some(nonce) = self.pop() {
            return Ok(nonce);
        }

        debug!(path = %self.path, "nonce cache empty, fetching");
        let headers = fetch(self.path.clone()).await?;
        self.extract(&headers).ok_or(HttpError::MissingNonce)
    }

    fn extract(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(&self.header)?
            .to_str()
            .ok()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}
