//! Storage backend implementations

pub mod local;
pub mod mock;
mod supabase;

pub use supabase::SupabaseBackend;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::{Result, StoreError};
use crate::store::{Authorizer, ObjectStore, RecordStore};

const DEFAULT_BUCKET: &str = "novels";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Supported backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Supabase,
    Local,
}

impl BackendKind {
    /// Parse backend kind from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "supabase" => Ok(Self::Supabase),
            "local" | "fs" | "filesystem" => Ok(Self::Local),
            _ => Err(StoreError::ConfigError(format!("Unknown backend kind: {}", s))),
        }
    }

    /// Get the environment variable name for this backend's service key
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            Self::Supabase => Some("SUPABASE_SERVICE_ROLE_KEY"),
            Self::Local => None,
        }
    }
}

/// The three store roles served by one configured backend
pub struct Backend {
    pub objects: Arc<dyn ObjectStore>,
    pub records: Arc<dyn RecordStore>,
    pub authorizer: Arc<dyn Authorizer>,
}

/// Create the stores for a named backend configuration
pub fn get_backend(name: &str, config: &BackendConfig) -> Result<Backend> {
    let kind = BackendKind::from_str(&config.kind)?;

    match kind {
        BackendKind::Supabase => {
            let url = config
                .url
                .clone()
                .or_else(|| std::env::var("SUPABASE_URL").ok())
                .ok_or_else(|| StoreError::MissingSetting {
                    backend: name.to_string(),
                    setting: "url".to_string(),
                })?;
            let api_key = get_api_key(config, kind, name)?;
            let bucket = config
                .bucket
                .clone()
                .unwrap_or_else(|| DEFAULT_BUCKET.to_string());
            let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

            let backend = Arc::new(SupabaseBackend::new(&url, api_key, bucket, timeout)?);
            Ok(Backend {
                objects: backend.clone(),
                records: backend.clone(),
                authorizer: backend,
            })
        }
        BackendKind::Local => {
            let root = match &config.root {
                Some(root) => root.clone(),
                None => default_local_root()?,
            };
            let public_base_url = config.public_base_url.clone();

            Ok(Backend {
                objects: Arc::new(local::LocalObjectStore::new(
                    root.join("objects"),
                    public_base_url,
                )),
                records: Arc::new(local::JsonRecordStore::new(root.join("records"))),
                authorizer: Arc::new(local::OpenAuthorizer),
            })
        }
    }
}

/// Default data directory for the local backend
fn default_local_root() -> Result<PathBuf> {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .map(|d| d.join("novel-shelf"))
        .ok_or_else(|| StoreError::ConfigError("Could not determine data directory".into()))
}

/// Get API key from config or the backend kind's environment variable
fn get_api_key(config: &BackendConfig, kind: BackendKind, backend_name: &str) -> Result<String> {
    // Check config first
    if let Some(key) = config.api_key.clone() {
        return Ok(key);
    }

    let env_var = kind.env_var().ok_or_else(|| {
        StoreError::ConfigError(format!("Backend '{}' does not take an api key", backend_name))
    })?;

    // Fall back to environment variable
    std::env::var(env_var).map_err(|_| StoreError::MissingApiKey {
        backend: backend_name.to_string(),
        env_var: env_var.to_string(),
    })
}
