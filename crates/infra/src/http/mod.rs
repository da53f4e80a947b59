//! Retrying HTTP client
//!
//! - [`policy`]: per-status retry functions and the retry budget
//! - [`attempt`]: the per-host retry loop with body replay
//! - [`failover`]: ordered multi-host iteration
//! - [`auth`]: bearer and DPoP credentials
//! - [`nonce`]: replay-nonce cache
//! - [`decode`]: response decoding into `(headers, status, body)`

mod attempt;
pub mod auth;
pub mod body;
pub mod client;
pub mod context;
pub mod decode;
pub mod dns;
pub mod error;
pub mod factory;
pub mod failover;
pub mod nonce;
pub mod policy;
pub mod transport;

pub use auth::{AuthToken, Authorizer, Credentials, HolderKey, TokenType};
pub use body::RequestBody;
pub use client::{BeforeSend, CallerIdentity, HttpClient, HttpClientBuilder};
pub use context::RequestContext;
pub use decode::{ApiErrorBody, Response};
pub use error::{HostFailure, HttpError};
pub use factory::ClientFactory;
pub use failover::FAILOVER_STATUSES;
pub use nonce::NonceCache;
pub use policy::{
    retry_up_to, Outcome, Policy, RetryDecision, RetryFn, RetryReason, DEFAULT_NON_RETRYABLE,
    DEFAULT_TOTAL_RETRY_LIMIT, TRANSPORT_ERROR_CODE,
};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportOptions};
