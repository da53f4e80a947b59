//! Attempt engine
//!
//! Runs one logical request against one host as a bounded retry loop. Each
//! attempt rebuilds the request from scratch: client headers, context
//! overrides, correlation id, caller identity, the replayed body,
//! credentials (a fresh DPoP proof every time), then the before-send hook.

use std::sync::Arc;
use std::time::Instant;

use porter_domain::constants::{HEADER_CALLER_IDENTITY, HEADER_CORRELATION_ID};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, Request};
use tracing::{debug, warn};
use url::Url;

use super::auth::{Authorizer, Credentials};
use super::body::RequestBody;
use super::client::{BeforeSend, CallerIdentity};
use super::context::RequestContext;
use super::error::HttpError;
use super::nonce::NonceCache;
use super::policy::{Outcome, Policy, RetryReason};
use super::transport::{Transport, TransportError};

/// How the last attempt ended
#[derive(Debug)]
pub(crate) enum Final {
    Response { response: reqwest::Response, reason: RetryReason },
    Transport { error: TransportError, reason: RetryReason },
}

/// One logical request against one URL
pub(crate) struct AttemptSpec<'a> {
    pub method: &'a Method,
    pub url: Url,
    pub body: &'a RequestBody,
    pub correlation_id: &'a HeaderValue,
    /// Feed response nonces into the cache
    pub harvest: bool,
}

/// Client state captured once per call
pub(crate) struct Engine<'a> {
    pub policy: Arc<Policy>,
    pub headers: HeaderMap,
    pub transport: Arc<dyn Transport>,
    pub before_send: Option<BeforeSend>,
    pub identity: Option<Arc<dyn CallerIdentity>>,
    pub authorizer: &'a Authorizer,
    pub nonces: Option<&'a NonceCache>,
}

pub(crate) fn header_name(name: &str) -> Result<HeaderName, HttpError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| HttpError::InvalidRequest(format!("header name '{name}': {e}")))
}

/// Correlation id for a call: the context's id, else its header override,
/// else a new UUID.
pub(crate) fn correlation_id(ctx: &RequestContext) -> Result<HeaderValue, HttpError> {
    if let Some(id) = ctx.correlation_id() {
        return HeaderValue::from_str(id)
            .map_err(|e| HttpError::InvalidRequest(format!("correlation id '{id}': {e}")));
    }
    if let Some(value) = ctx.headers().get(header_name(HEADER_CORRELATION_ID)?) {
        return Ok(value.clone());
    }
    HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
        .map_err(|e| HttpError::InvalidRequest(e.to_string()))
}

impl Engine<'_> {
    /// Run the retry loop.
    ///
    /// # Errors
    /// Cancellation and deadline end the loop with [`HttpError::Cancelled`]
    /// or [`HttpError::DeadlineExceeded`]. Auth and request building
    /// failures are returned before any attempt is sent. Transport and status
    /// failures are not errors here; they come back as [`Final`].
    pub(crate) async fn execute(
        &self,
        ctx: &RequestContext,
        spec: &AttemptSpec<'_>,
    ) -> Result<Final, HttpError> {
        let credentials = self.authorizer.authorize(&spec.url)?;
        let mut attempt: u32 = 0;

        loop {
            let request = self.build_request(ctx, spec, credentials.as_deref())?;
            debug!(attempt, method = %spec.method, url = %spec.url, "sending request");

            let started = Instant::now();
            let result = ctx.run(self.transport.send(request)).await?;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let decision = match &result {
                Ok(response) => {
                    if spec.harvest {
                        if let Some(nonces) = self.nonces {
                            nonces.set_from_headers(response.headers());
                        }
                    }
                    debug!(attempt, elapsed_ms, status = %response.status(), "attempt finished");
                    self.policy.should_retry(ctx, attempt, Outcome::Response(response.status()))
                }
                Err(error) => {
                    debug!(attempt, elapsed_ms, error = %error, "attempt failed");
                    self.policy.should_retry(ctx, attempt, Outcome::Transport(error.message()))
                }
            };

            if !decision.retry {
                if let Some(err) = HttpError::from_context(&decision.reason) {
                    return Err(err);
                }
                return Ok(match result {
                    Ok(response) => Final::Response { response, reason: decision.reason },
                    Err(error) => Final::Transport { error, reason: decision.reason },
                });
            }

            if let Ok(response) = result {
                // unread bodies pin the connection
                let _ = ctx.run(response.bytes()).await?;
            }

            warn!(
                attempt,
                url = %spec.url,
                reason = %decision.reason,
                sleep_ms = u64::try_from(decision.sleep.as_millis()).unwrap_or(u64::MAX),
                "retrying request"
            );
            ctx.sleep(decision.sleep).await?;
            attempt += 1;
        }
    }

    fn build_request(
        &self,
        ctx: &RequestContext,
        spec: &AttemptSpec<'_>,
        credentials: Option<&Credentials>,
    ) -> Result<Request, HttpError> {
        let mut request = Request::new(spec.method.clone(), spec.url.clone());
        let headers = request.headers_mut();

        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }
        for name in ctx.headers().keys() {
            headers.remove(name);
        }
        for (name, value) in ctx.headers() {
            headers.append(name.clone(), value.clone());
        }

        headers.insert(header_name(HEADER_CORRELATION_ID)?, spec.correlation_id.clone());

        if let Some(identity) = self.identity.as_ref().and_then(|p| p.caller_identity()) {
            let value = HeaderValue::from_str(&identity)
                .map_err(|e| HttpError::InvalidRequest(format!("caller identity: {e}")))?;
            headers.insert(header_name(HEADER_CALLER_IDENTITY)?, value);
        }

        if let Some(bytes) = spec.body.replay() {
            if !headers.contains_key(CONTENT_TYPE) {
                if let Some(content_type) = spec.body.content_type() {
                    headers.insert(CONTENT_TYPE, content_type.clone());
                }
            }
            headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            *request.body_mut() = Some(reqwest::Body::from(bytes));
        }

        if let Some(credentials) = credentials {
            credentials.apply(&mut request)?;
        }
        if let Some(hook) = &self.before_send {
            hook(&mut request)?;
        }
        Ok(request)
    }
}
