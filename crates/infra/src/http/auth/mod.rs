//! Auth decorator
//!
//! Resolves the access token for a request URL and stamps `Authorization`
//! (plus a `DPoP` proof for holder-key bound tokens) onto every attempt.
//!
//! Token lookup order:
//! 1. the configured environment variable, when set and non-empty
//! 2. `<storage-root>/<host-folder>/.auth_token`
//!
//! The host folder is the URL authority with `:` replaced by `_`
//! (`api.example:8443` → `api.example_8443`). Holder keys live next to the
//! token as `<thumbprint>.jwk`. Credentials are only attached to `https` and
//! `unixs` URLs.

pub mod dpop;
pub mod token;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use porter_domain::constants::{AUTH_TOKEN_FILE, HEADER_DPOP, JWK_FILE_EXTENSION};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Request;
use tracing::debug;
use url::Url;

pub use dpop::{HolderKey, Jwk, KeyError};
pub use token::{AuthToken, TokenError, TokenType};

use super::error::HttpError;

const AUTH_SCHEMES: &[&str] = &["https", "unixs"];

/// A parsed token and, for DPoP, its holder key
#[derive(Debug)]
pub struct Credentials {
    token: AuthToken,
    key: Option<HolderKey>,
}

impl Credentials {
    pub fn bearer(token: AuthToken) -> Self {
        Self { token, key: None }
    }

    pub fn with_holder_key(token: AuthToken, key: HolderKey) -> Self {
        Self { token, key: Some(key) }
    }

    pub fn token(&self) -> &AuthToken {
        &self.token
    }

    pub fn holder_key(&self) -> Option<&HolderKey> {
        self.key.as_ref()
    }

    /// Stamp the headers for one attempt. DPoP proofs are signed fresh each
    /// time.
    ///
    /// # Errors
    /// [`HttpError::Auth`] when the token expired or signing fails.
    pub fn apply(&self, request: &mut Request) -> Result<(), HttpError> {
        self.token.ensure_fresh().map_err(|e| HttpError::Auth(e.to_string()))?;

        let authorization = HeaderValue::from_str(&self.token.authorization())
            .map_err(|_| HttpError::Auth("access token is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, authorization);

        if let Some(key) = &self.key {
            let proof = key
                .proof(request.method(), request.url())
                .map_err(|e| HttpError::Auth(e.to_string()))?;
            let proof = HeaderValue::from_str(&proof)
                .map_err(|_| HttpError::Auth("DPoP proof is not a valid header value".to_string()))?;
            let name = HeaderName::from_bytes(HEADER_DPOP.as_bytes())
                .map_err(|e| HttpError::Auth(e.to_string()))?;
            request.headers_mut().insert(name, proof);
        }
        Ok(())
    }
}

/// Lazily loads and caches credentials per host folder
#[derive(Debug, Default)]
pub struct Authorizer {
    storage_root: Option<PathBuf>,
    env_name: Option<String>,
    cache: Mutex<HashMap<String, Arc<Credentials>>>,
}

impl Authorizer {
    pub fn new(storage_root: Option<PathBuf>, env_name: Option<String>) -> Self {
        Self {
            storage_root,
            env_name: env_name.filter(|n| !n.trim().is_empty()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.storage_root.is_some() || self.env_name.is_some()
    }

    pub fn storage_root(&self) -> Option<&Path> {
        self.storage_root.as_deref()
    }

    /// Forget cached credentials, e.g. after a token refresh on disk.
    pub fn invalidate(&self) {
        self.cache.lock().clear();
    }

    /// Credentials for `url`, or `None` when no token applies.
    ///
    /// # Errors
    /// [`HttpError::Auth`] for unreadable, malformed or expired tokens and
    /// unusable holder keys.
    pub fn authorize(&self, url: &Url) -> Result<Option<Arc<Credentials>>, HttpError> {
        if !AUTH_SCHEMES.contains(&url.scheme()) || !self.is_configured() {
            return Ok(None);
        }
        let folder = host_folder(url);

        let from_env = self
            .env_name
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        if let Some(cached) = self.cache.lock().get(&folder) {
            let still_current = match &from_env {
                Some(raw) => cached.token.raw() == raw,
                None => true,
            };
            if still_current {
                cached.token.ensure_fresh().map_err(|e| HttpError::Auth(e.to_string()))?;
                return Ok(Some(Arc::clone(cached)));
            }
        }

        let raw = match from_env {
            Some(raw) => raw,
            None => match self.read_token_file(&folder)? {
                Some(raw) => raw,
                None => return Ok(None),
            },
        };

        let token = AuthToken::parse(&raw).map_err(|e| HttpError::Auth(e.to_string()))?;
        token.ensure_fresh().map_err(|e| HttpError::Auth(e.to_string()))?;

        let credentials = match token.dpop_jkt().map(str::to_string) {
            Some(jkt) => {
                let key = self.load_holder_key(&folder, &jkt)?;
                Credentials::with_holder_key(token, key)
            }
            None => Credentials::bearer(token),
        };
        debug!(host = %folder, token_type = %credentials.token.token_type(), "loaded auth token");

        let credentials = Arc::new(credentials);
        self.cache.lock().insert(folder, Arc::clone(&credentials));
        Ok(Some(credentials))
    }

    fn read_token_file(&self, folder: &str) -> Result<Option<String>, HttpError> {
        let Some(root) = &self.storage_root else {
            return Ok(None);
        };
        let path = root.join(folder).join(AUTH_TOKEN_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HttpError::Auth(format!("read {}: {e}", path.display()))),
        }
    }

    fn load_holder_key(&self, folder: &str, jkt: &str) -> Result<HolderKey, HttpError> {
        let root = self.storage_root.as_ref().ok_or_else(|| {
            HttpError::Auth("DPoP token needs a storage folder for its holder key".to_string())
        })?;
        let path = root.join(folder).join(format!("{jkt}.{JWK_FILE_EXTENSION}"));
        HolderKey::load_bound(&path, jkt).map_err(|e| HttpError::Auth(e.to_string()))
    }
}

/// Storage folder name for the URL's authority.
pub fn host_folder(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    authority.replace(':', "_")
}
