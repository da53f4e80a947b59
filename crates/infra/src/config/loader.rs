//! Configuration loader
//!
//! Loads the client factory configuration from a YAML or JSON file.
//!
//! ## Loading Strategy
//! 1. An explicit path, when the caller passes one
//! 2. The path in `PORTER_CLIENTS_CONFIG`
//! 3. The first existing file among the probed locations
//!
//! ## File Locations
//! The loader probes the following names (in order), first in the current
//! working directory and then next to the executable:
//! `clients.yaml`, `clients.yml`, `clients.json`
//!
//! The format follows the extension; anything other than `.json` is read
//! as YAML.

use std::path::{Path, PathBuf};

use porter_domain::constants::ENV_CLIENTS_CONFIG;
use porter_domain::{FactoryConfig, PorterError, Result};

use crate::errors::InfraError;

const CANDIDATE_NAMES: &[&str] = &["clients.yaml", "clients.yml", "clients.json"];

/// Load and validate the factory configuration.
///
/// # Errors
/// Returns `PorterError::Config` if no file is found, the file cannot be
/// parsed, or validation fails.
pub fn load() -> Result<FactoryConfig> {
    load_from_file(None)
}

/// Load from `path`, or from the env override / probed locations when
/// `None`.
///
/// # Errors
/// Returns `PorterError::Config` if:
/// - The given file does not exist
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - Validation fails (empty or duplicate hosts)
pub fn load_from_file(path: Option<PathBuf>) -> Result<FactoryConfig> {
    let config_path = match path.or_else(env_path) {
        Some(p) => {
            if !p.exists() {
                return Err(PorterError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            PorterError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading client configuration from file");

    let contents = std::fs::read_to_string(&config_path).map_err(InfraError::from)?;
    let config = parse_config(&contents, &config_path)?;
    config.validate()?;

    tracing::debug!(clients = config.clients.len(), "client configuration loaded");
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json`, otherwise YAML).
///
/// # Errors
/// Returns `PorterError::Config` if parsing fails.
pub fn parse_config(contents: &str, path: &Path) -> Result<FactoryConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("yaml");

    let parsed = match extension.to_ascii_lowercase().as_str() {
        "json" => serde_json::from_str(contents).map_err(InfraError::from)?,
        "yaml" | "yml" => serde_yaml::from_str(contents).map_err(InfraError::from)?,
        other => {
            return Err(PorterError::Config(format!("Unsupported config format: {other}")));
        }
    };
    Ok(parsed)
}

/// Probe the standard locations for a client configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| CANDIDATE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

fn env_path() -> Option<PathBuf> {
    std::env::var(ENV_CLIENTS_CONFIG).ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from)
}
