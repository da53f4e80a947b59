//! Named client registry built from a [`FactoryConfig`]

use std::collections::BTreeMap;
use std::path::PathBuf;

use porter_domain::{FactoryConfig, PorterError, Result};
use tracing::info;

use super::client::HttpClient;

#[derive(Debug, Clone, Default)]
pub struct ClientFactory {
    clients: BTreeMap<String, HttpClient>,
}

impl ClientFactory {
    /// Validate `config` and build one client per entry.
    ///
    /// # Errors
    /// `PorterError::Config` for empty or duplicate hosts and for any client
    /// that fails to build.
    pub fn new(config: &FactoryConfig) -> Result<Self> {
        config.validate()?;

        let mut clients = BTreeMap::new();
        for (name, client_config) in &config.clients {
            let client = HttpClient::from_config(name.clone(), client_config)
                .map_err(|e| PorterError::Config(format!("client '{name}': {e}")))?;
            clients.insert(name.clone(), client);
        }

        info!(clients = clients.len(), "http client factory ready");
        Ok(Self { clients })
    }

    /// Load the configuration file (see [`crate::config::loader`]) and build
    /// every client.
    ///
    /// # Errors
    /// As [`crate::config::load_from_file`] and [`ClientFactory::new`].
    pub fn from_file(path: Option<PathBuf>) -> Result<Self> {
        let config = crate::config::load_from_file(path)?;
        Self::new(&config)
    }

    /// # Errors
    /// `PorterError::NotFound` for an unknown name.
    pub fn get(&self, name: &str) -> Result<HttpClient> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| PorterError::NotFound(format!("http client '{name}' is not configured")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
