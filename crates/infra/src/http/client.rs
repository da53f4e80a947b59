use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use porter_domain::{ClientConfig, NonceConfig, TlsConfig};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Method, Request};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWrite;
use tracing::instrument;
use url::{Position, Url};

use super::attempt::{correlation_id, Engine, Final};
use super::auth::Authorizer;
use super::body::RequestBody;
use super::context::RequestContext;
use super::decode::{decode_json, decode_to_writer, Response};
use super::error::HttpError;
use super::failover::{execute_hosts, CallSpec};
use super::nonce::NonceCache;
use super::policy::Policy;
use super::transport::{ReqwestTransport, Transport, TransportOptions};

/// Hook run on every attempt after all headers are set
pub type BeforeSend = Arc<dyn Fn(&mut Request) -> Result<(), HttpError> + Send + Sync>;

/// Supplies the `X-Caller-Identity` header value
pub trait CallerIdentity: Send + Sync {
    fn caller_identity(&self) -> Option<String>;
}

impl<F> CallerIdentity for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn caller_identity(&self) -> Option<String> {
        self()
    }
}

struct ClientState {
    policy: Arc<Policy>,
    headers: HeaderMap,
    transport: Arc<dyn Transport>,
    hosts: Vec<String>,
    before_send: Option<BeforeSend>,
    identity: Option<Arc<dyn CallerIdentity>>,
}

struct ClientInner {
    name: String,
    state: RwLock<ClientState>,
    authorizer: Authorizer,
    nonces: Option<NonceCache>,
}

/// HTTP client with per-status retry policies and multi-host failover.
///
/// Cheap to clone; clones share configuration, credentials and the nonce
/// cache.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("HttpClient")
            .field("name", &self.inner.name)
            .field("hosts", &state.hosts)
            .field("policy", &state.policy)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Build a client from configuration.
    ///
    /// # Errors
    /// See [`HttpClientBuilder::build`].
    pub fn from_config(name: impl Into<String>, config: &ClientConfig) -> Result<Self, HttpError> {
        Self::builder().name(name).from_config(config).build()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn hosts(&self) -> Vec<String> {
        self.inner.state.read().hosts.clone()
    }

    pub fn policy(&self) -> Arc<Policy> {
        Arc::clone(&self.inner.state.read().policy)
    }

    pub fn headers(&self) -> HeaderMap {
        self.inner.state.read().headers.clone()
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.inner.authorizer
    }

    pub fn nonce_cache(&self) -> Option<&NonceCache> {
        self.inner.nonces.as_ref()
    }

    pub fn set_policy(&self, policy: Policy) {
        self.inner.state.write().policy = Arc::new(policy);
    }

    pub fn set_headers(&self, headers: HeaderMap) {
        self.inner.state.write().headers = headers;
    }

    pub fn add_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.state.write().headers.append(name, value);
    }

    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        self.inner.state.write().transport = transport;
    }

    /// Replace the configured hosts.
    ///
    /// # Errors
    /// [`HttpError::Config`] when a host is not a valid URL.
    pub fn set_hosts<I, S>(&self, hosts: I) -> Result<(), HttpError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = normalize_hosts(hosts)?;
        self.inner.state.write().hosts = hosts;
        Ok(())
    }

    pub fn set_before_send(&self, hook: Option<BeforeSend>) {
        self.inner.state.write().before_send = hook;
    }

    pub fn set_caller_identity(&self, identity: Option<Arc<dyn CallerIdentity>>) {
        self.inner.state.write().identity = identity;
    }

    fn engine(&self) -> Engine<'_> {
        let state = self.inner.state.read();
        Engine {
            policy: Arc::clone(&state.policy),
            headers: state.headers.clone(),
            transport: Arc::clone(&state.transport),
            before_send: state.before_send.clone(),
            identity: state.identity.clone(),
            authorizer: &self.inner.authorizer,
            nonces: self.inner.nonces.as_ref(),
        }
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        method: &Method,
        hosts: Option<Vec<String>>,
        path: &str,
        body: &RequestBody,
        harvest: bool,
    ) -> Result<(Final, RequestContext), HttpError> {
        let engine = self.engine();
        let hosts = match hosts {
            Some(hosts) => hosts,
            None => self.hosts(),
        };
        let ctx = ctx.with_default_timeout(engine.policy.request_timeout());
        let correlation_id = correlation_id(&ctx)?;
        let call = CallSpec { method, path, body, correlation_id: &correlation_id, harvest };

        let outcome = execute_hosts(&engine, &ctx, &hosts, &call).await?;
        Ok((outcome, ctx))
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        method: Method,
        hosts: Option<Vec<String>>,
        path: &str,
        body: RequestBody,
    ) -> Result<Response<T>, HttpError> {
        let (outcome, ctx) = self.call(ctx, &method, hosts, path, &body, true).await?;
        match outcome {
            Final::Response { response, reason } => decode_json(&ctx, response, reason).await,
            Final::Transport { error, reason } => {
                Err(HttpError::Transport { message: error.message().to_string(), reason })
            }
        }
    }

    /// Send `method path` to a single host and decode the JSON body.
    ///
    /// Numbers decode by the field type of `T`: pick `String` or a decimal
    /// type for values that must not pass through `f64`.
    ///
    /// # Errors
    /// See [`HttpError`]; status and headers of a failed response are
    /// available through [`HttpError::status`] and [`HttpError::headers`].
    #[instrument(skip(self, ctx, body), fields(client = %self.inner.name))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        method: Method,
        host: &str,
        path: &str,
        body: RequestBody,
    ) -> Result<Response<T>, HttpError> {
        let hosts = normalize_hosts([host])?;
        self.call_json(ctx, method, Some(hosts), path, body).await
    }

    /// Like [`request`](Self::request), failing over across `hosts` in order.
    ///
    /// # Errors
    /// [`HttpError::AllHostsFailed`] when every host fell through.
    #[instrument(skip(self, ctx, hosts, body), fields(client = %self.inner.name))]
    pub async fn request_to_hosts<T, I, S>(
        &self,
        ctx: &RequestContext,
        method: Method,
        hosts: I,
        path: &str,
        body: RequestBody,
    ) -> Result<Response<T>, HttpError>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = normalize_hosts(hosts)?;
        self.call_json(ctx, method, Some(hosts), path, body).await
    }

    /// Send to an absolute URL.
    ///
    /// # Errors
    /// [`HttpError::InvalidRequest`] when `url` does not parse.
    #[instrument(skip(self, ctx, body), fields(client = %self.inner.name))]
    pub async fn request_url<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        method: Method,
        url: &str,
        body: RequestBody,
    ) -> Result<Response<T>, HttpError> {
        let parsed =
            Url::parse(url).map_err(|e| HttpError::InvalidRequest(format!("url '{url}': {e}")))?;
        let host = &parsed[..Position::BeforePath];
        let path = &parsed[Position::BeforePath..];
        self.call_json(ctx, method, Some(vec![host.to_string()]), path, body).await
    }

    /// Send to the configured hosts and copy the response body into
    /// `writer`.
    ///
    /// # Errors
    /// As [`request`](Self::request), plus [`HttpError::Write`].
    #[instrument(skip(self, ctx, body, writer), fields(client = %self.inner.name))]
    pub async fn request_to_writer<W: AsyncWrite + Unpin + Send + ?Sized>(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: RequestBody,
        writer: &mut W,
    ) -> Result<Response<u64>, HttpError> {
        let (outcome, ctx) = self.call(ctx, &method, None, path, &body, true).await?;
        match outcome {
            Final::Response { response, reason } => {
                decode_to_writer(&ctx, response, reason, writer).await
            }
            Final::Transport { error, reason } => {
                Err(HttpError::Transport { message: error.message().to_string(), reason })
            }
        }
    }

    /// `HEAD` against the configured hosts.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn head(&self, ctx: &RequestContext, path: &str) -> Result<Response<()>, HttpError> {
        self.call_json(ctx, Method::HEAD, None, path, RequestBody::empty()).await
    }

    /// `GET` against the configured hosts.
    ///
    /// Decimal amounts should be `String` (or a decimal type) in `T`.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn get<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<Response<T>, HttpError> {
        self.call_json(ctx, Method::GET, None, path, RequestBody::empty()).await
    }

    /// `POST` against the configured hosts.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn post<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> Result<Response<T>, HttpError> {
        self.call_json(ctx, Method::POST, None, path, body.into()).await
    }

    /// `PUT` against the configured hosts.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn put<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> Result<Response<T>, HttpError> {
        self.call_json(ctx, Method::PUT, None, path, body.into()).await
    }

    /// `DELETE` against the configured hosts.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn delete<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<Response<T>, HttpError> {
        self.call_json(ctx, Method::DELETE, None, path, RequestBody::empty()).await
    }

    /// Take a replay nonce, refilling with a `HEAD` when the cache is empty.
    ///
    /// # Errors
    /// [`HttpError::NonceNotConfigured`] without a nonce section,
    /// [`HttpError::MissingNonce`] when the refill response has no nonce.
    #[instrument(skip(self, ctx), fields(client = %self.inner.name))]
    pub async fn nonce(&self, ctx: &RequestContext) -> Result<String, HttpError> {
        let nonces = self.inner.nonces.as_ref().ok_or(HttpError::NonceNotConfigured)?;
        nonces
            .next_with(|path| async move {
                let body = RequestBody::empty();
                let (outcome, ctx) = self.call(ctx, &Method::HEAD, None, &path, &body, false).await?;
                let response: Response<()> = match outcome {
                    Final::Response { response, reason } => decode_json(&ctx, response, reason).await?,
                    Final::Transport { error, reason } => {
                        return Err(HttpError::Transport {
                            message: error.message().to_string(),
                            reason,
                        })
                    }
                };
                Ok::<_, HttpError>(response.headers)
            })
            .await
    }
}

/// Builder for [`HttpClient`].
#[derive(Default)]
pub struct HttpClientBuilder {
    name: Option<String>,
    policy: Option<Policy>,
    tls: Option<TlsConfig>,
    transport: Option<Arc<dyn Transport>>,
    timeout: Option<Duration>,
    retry_limit: Option<u32>,
    hosts: Vec<String>,
    dns_server: Option<String>,
    before_send: Option<BeforeSend>,
    identity: Option<Arc<dyn CallerIdentity>>,
    user_agent: Option<String>,
    storage_folder: Option<PathBuf>,
    auth_token_env: Option<String>,
    nonce: Option<NonceConfig>,
    headers: Vec<(String, String)>,
}

impl fmt::Debug for HttpClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientBuilder")
            .field("name", &self.name)
            .field("hosts", &self.hosts)
            .field("timeout", &self.timeout)
            .field("retry_limit", &self.retry_limit)
            .finish_non_exhaustive()
    }
}

impl HttpClientBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Use a custom transport. TLS, DNS and user-agent transport options are
    /// then ignored.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Timeout for each logical call, across all of its attempts.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Total retry budget for each call.
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.hosts.push(host.into());
        self
    }

    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    pub fn dns_server(mut self, server: impl Into<String>) -> Self {
        self.dns_server = Some(server.into());
        self
    }

    pub fn before_send<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Request) -> Result<(), HttpError> + Send + Sync + 'static,
    {
        self.before_send = Some(Arc::new(hook));
        self
    }

    pub fn caller_identity(mut self, identity: impl CallerIdentity + 'static) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn storage_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.storage_folder = Some(folder.into());
        self
    }

    /// Environment variable whose value replaces the stored auth token.
    pub fn auth_token_env(mut self, name: impl Into<String>) -> Self {
        self.auth_token_env = Some(name.into());
        self
    }

    pub fn nonce(mut self, nonce: NonceConfig) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Apply every option present in `config`.
    pub fn from_config(mut self, config: &ClientConfig) -> Self {
        self.hosts.extend(config.all_hosts());
        if let Some(tls) = &config.tls {
            self.tls = Some(tls.clone());
        }
        if let Some(request) = &config.request {
            self.retry_limit = request.retry_limit.or(self.retry_limit);
            self.timeout = request.timeout.or(self.timeout);
        }
        if let Some(folder) = &config.storage_folder {
            self.storage_folder = Some(PathBuf::from(folder));
        }
        if let Some(env) = &config.auth_token_env {
            self.auth_token_env = Some(env.clone());
        }
        if let Some(agent) = &config.user_agent {
            self.user_agent = Some(agent.clone());
        }
        if let Some(server) = &config.dns_server {
            self.dns_server = Some(server.clone());
        }
        if let Some(nonce) = &config.nonce {
            self.nonce = Some(nonce.clone());
        }
        self.headers.extend(config.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Build the client.
    ///
    /// # Errors
    /// [`HttpError::Config`] for invalid hosts, headers, TLS materials, DNS
    /// server or nonce header.
    pub fn build(self) -> Result<HttpClient, HttpError> {
        let mut policy = self.policy.unwrap_or_default();
        if let Some(limit) = self.retry_limit {
            policy = policy.with_total_retry_limit(limit);
        }
        if let Some(timeout) = self.timeout {
            policy = policy.with_request_timeout(timeout);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HttpError::Config(format!("header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| HttpError::Config(format!("header value for '{name}': {e}")))?;
            headers.append(header, value);
        }
        if let Some(agent) = &self.user_agent {
            let value = HeaderValue::from_str(agent)
                .map_err(|e| HttpError::Config(format!("user agent: {e}")))?;
            headers.insert(USER_AGENT, value);
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::from_options(&TransportOptions {
                tls: self.tls,
                dns_server: self.dns_server,
                user_agent: self.user_agent,
            })?),
        };

        let nonces = self.nonce.as_ref().map(NonceCache::new).transpose()?;
        let hosts = normalize_hosts(&self.hosts)?;
        let name = self.name.unwrap_or_else(|| hosts.first().cloned().unwrap_or_default());

        Ok(HttpClient {
            inner: Arc::new(ClientInner {
                name,
                state: RwLock::new(ClientState {
                    policy: Arc::new(policy),
                    headers,
                    transport,
                    hosts,
                    before_send: self.before_send,
                    identity: self.identity,
                }),
                authorizer: Authorizer::new(self.storage_folder, self.auth_token_env),
                nonces,
            }),
        })
    }
}

/// Trim hosts, default the scheme to `https` and check they parse.
fn normalize_hosts<I, S>(hosts: I) -> Result<Vec<String>, HttpError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    hosts
        .into_iter()
        .map(|host| {
            let host = host.as_ref().trim().trim_end_matches('/');
            if host.is_empty() {
                return Err(HttpError::Config("empty host".to_string()));
            }
            let host =
                if host.contains("://") { host.to_string() } else { format!("https://{host}") };
            Url::parse(&host).map_err(|e| HttpError::Config(format!("host '{host}': {e}")))?;
            Ok(host)
        })
        .collect()
}
