//! Transport seam
//!
//! The retry client never talks to `reqwest::Client` directly; it sends
//! through a [`Transport`] so tests and embedders can intercept attempts.
//! [`ReqwestTransport`] is the default and carries TLS, DNS and user-agent
//! settings.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use porter_domain::TlsConfig;
use reqwest::{Certificate, Client as ReqwestClient, Identity, Request, Response};
use tracing::debug;

use super::dns::NameServerResolver;
use super::error::HttpError;

/// Transport failure with the full source chain flattened into one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// Join `err` and every `source()` below it with `": "`.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = cause.source();
        }
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_error(&err)
    }
}

/// Sends one fully built request
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

/// Options for the default transport
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub tls: Option<TlsConfig>,
    pub dns_server: Option<String>,
    pub user_agent: Option<String>,
}

/// Default [`Transport`] backed by a pooled `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    pub fn new(client: ReqwestClient) -> Self {
        Self { client }
    }

    /// Build a rustls client from `options`.
    ///
    /// # Errors
    /// Returns [`HttpError::Config`] when TLS materials cannot be read or
    /// parsed, the DNS server is invalid, or the client fails to build.
    pub fn from_options(options: &TransportOptions) -> Result<Self, HttpError> {
        let mut builder = ReqwestClient::builder().use_rustls_tls().no_proxy();

        if let Some(agent) = &options.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        if let Some(tls) = &options.tls {
            if let Some(ca) = &tls.trusted_ca {
                let pem = read_pem(ca)?;
                let cert = Certificate::from_pem(&pem)
                    .map_err(|e| HttpError::Config(format!("trusted CA {ca}: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }

            match (&tls.cert, &tls.key) {
                (Some(cert), Some(key)) => {
                    let mut pem = read_pem(cert)?;
                    pem.push(b'\n');
                    pem.extend(read_pem(key)?);
                    let identity = Identity::from_pem(&pem)
                        .map_err(|e| HttpError::Config(format!("client certificate {cert}: {e}")))?;
                    builder = builder.identity(identity);
                }
                (None, None) => {}
                _ => {
                    return Err(HttpError::Config(
                        "tls cert and key must be configured together".to_string(),
                    ))
                }
            }
        }

        if let Some(server) = &options.dns_server {
            let resolver = NameServerResolver::new(server)?;
            debug!(server = %resolver.server(), "using custom DNS server");
            builder = builder.dns_resolver(Arc::new(resolver));
        }

        let client = builder.build().map_err(|e| HttpError::Config(TransportError::from(e).to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        self.client.execute(request).await.map_err(TransportError::from)
    }
}

fn read_pem(path: &str) -> Result<Vec<u8>, HttpError> {
    fs::read(path).map_err(|e| HttpError::Config(format!("read {path}: {e}")))
}
