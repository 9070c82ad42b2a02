use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(
        "Credentials not found for {backend}. Set {env_var} environment variable or add to config."
    )]
    MissingApiKey { backend: String, env_var: String },

    #[error("Backend '{backend}' is missing required setting '{setting}'")]
    MissingSetting { backend: String, setting: String },

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Uploads are disabled for this store")]
    Disabled,

    #[error("API error{}: {message}", status_code.map(|c| format!(" (HTTP {})", c)).unwrap_or_default())]
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
