//! Credentials/config file and endpoint resolution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cnat_core::{Error, Result};
use cnat_events::InMemoryCluster;
use serde::Deserialize;

/// The in-process store.
pub const MEMORY_ENDPOINT: &str = "memory://";

fn default_endpoint() -> String {
    MEMORY_ENDPOINT.to_string()
}

/// Contents of the `--kubeconfig` file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Store endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Multi-document YAML file of Tasks to seed the store with. Relative
    /// paths are resolved against the config file's directory.
    #[serde(default)]
    pub manifests: Option<PathBuf>,
    /// Execute Job commands locally.
    #[serde(default)]
    pub run_jobs: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            manifests: None,
            run_jobs: false,
        }
    }
}

impl ClusterConfig {
    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TomlParseFailed`] on malformed TOML or unknown keys.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| Error::toml_parse_failed(e.to_string()))
    }

    /// Read and parse a config file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileReadFailed`] if the file cannot be read and
    /// [`Error::TomlParseFailed`] if it cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        let mut config = Self::from_toml_str(&input)?;
        if let (Some(manifests), Some(dir)) = (&config.manifests, path.parent()) {
            if manifests.is_relative() {
                config.manifests = Some(dir.join(manifests));
            }
        }
        Ok(config)
    }
}

/// A store the controller can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Memory,
}

impl Endpoint {
    /// Pick the endpoint: `--master` wins over the config file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for any endpoint other than
    /// [`MEMORY_ENDPOINT`].
    pub fn resolve(master: Option<&str>, config: &ClusterConfig) -> Result<Self> {
        let endpoint = master.unwrap_or(&config.endpoint);
        match endpoint {
            MEMORY_ENDPOINT => Ok(Self::Memory),
            other => Err(Error::invalid_config(format!(
                "unsupported endpoint '{other}', only {MEMORY_ENDPOINT} is available"
            ))),
        }
    }

    /// Open the store.
    #[must_use]
    pub fn connect(self) -> Arc<InMemoryCluster> {
        match self {
            Self::Memory => InMemoryCluster::new_arc(),
        }
    }
}
