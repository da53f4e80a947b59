//! Configuration management
//!
//! Serde structures describing HTTP clients. A factory file groups several
//! named clients:
//!
//! ```yaml
//! clients:
//!   billing:
//!     host: https://billing.internal:8443
//!     request:
//!       retry_limit: 3
//!       timeout: 10s
//!     storage_folder: /var/lib/porter
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use porter_common::utils::serde::option_duration_str;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_NONCE_HEADER;
use crate::errors::{PorterError, Result};

/// Configuration of a single HTTP client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Primary host, e.g. `https://api.example.com:8443`
    pub host: String,

    /// Additional failover hosts tried after `host`, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestConfig>,

    /// Root folder holding per-host `.auth_token` and JWK files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_folder: Option<String>,

    /// Environment variable that overrides the stored auth token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Name server (`ip` or `ip:port`) used instead of the system resolver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_server: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<NonceConfig>,

    /// Static headers attached to every request
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl ClientConfig {
    /// Create a configuration for a single host with defaults elsewhere.
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), ..Self::default() }
    }

    /// All hosts in failover order: `host` first, then `hosts`.
    pub fn all_hosts(&self) -> Vec<String> {
        std::iter::once(&self.host)
            .chain(self.hosts.iter())
            .filter(|h| !h.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// TLS materials, all PEM file paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_ca: Option<String>,
}

/// Request policy overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Total retry budget for one call, across all attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<u32>,

    /// Timeout for the whole logical call (`"500ms"`, `"10s"`, `"1m"`)
    #[serde(default, with = "option_duration_str", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// Replay-nonce source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceConfig {
    /// Path queried with `HEAD` when the cache runs dry
    pub path: String,

    #[serde(default = "default_nonce_header")]
    pub header: String,
}

impl NonceConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), header: default_nonce_header() }
    }
}

fn default_nonce_header() -> String {
    DEFAULT_NONCE_HEADER.to_string()
}

/// Named client configurations loaded from a single file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactoryConfig {
    #[serde(default)]
    pub clients: BTreeMap<String, ClientConfig>,
}

impl FactoryConfig {
    /// Validate the set of clients.
    ///
    /// # Errors
    /// Returns `PorterError::Config` when a client has no host or when the
    /// same host appears in more than one entry.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<String, &str> = HashMap::new();

        for (name, client) in &self.clients {
            let hosts = client.all_hosts();
            if hosts.is_empty() {
                return Err(PorterError::Config(format!("client '{name}' has no host")));
            }

            for host in hosts {
                let key = normalize_host(&host);
                if let Some(previous) = seen.insert(key, name.as_str()) {
                    if previous != name {
                        return Err(PorterError::Config(format!(
                            "duplicate host '{host}' in clients '{previous}' and '{name}'"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('/').to_ascii_lowercase()
}
