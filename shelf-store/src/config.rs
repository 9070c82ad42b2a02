use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend to use when no --backend flag is provided
    #[serde(default = "default_backend")]
    pub default_backend: String,

    /// Named backend configurations
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
}

fn default_backend() -> String {
    "local".to_string()
}

/// A named storage backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend identifier (supabase, local)
    pub kind: String,

    /// Project URL (for supabase)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Service key (optional, can use env var instead)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Storage bucket holding covers and chapter images (for supabase)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Root directory (for local)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Base URL prepended to stored object names (for local)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,

    /// Per-request timeout in seconds (for supabase)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl StoreConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: StoreConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home =
            std::env::var("HOME").map_err(|_| StoreError::ConfigError("HOME not set".into()))?;
        Ok(PathBuf::from(home).join(".config/cli-programs/store.toml"))
    }

    /// Get a backend by name
    pub fn get_backend(&self, name: &str) -> Result<&BackendConfig> {
        self.backends
            .get(name)
            .ok_or_else(|| StoreError::UnknownBackend(name.to_string()))
    }

    /// Resolve an explicit backend name, falling back to `default_backend`
    pub fn backend_or_default<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        name.unwrap_or(&self.default_backend)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let mut backends = HashMap::new();

        // Local filesystem backend under the user data directory
        backends.insert(
            "local".to_string(),
            BackendConfig {
                kind: "local".to_string(),
                ..BackendConfig::default()
            },
        );

        Self {
            default_backend: default_backend(),
            backends,
        }
    }
}
