//! novel-ingest configuration management.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::chapters::MIN_CHAPTER_CHARS;
use crate::package::DEFAULT_PACKAGE_PATH;

const DEFAULT_PREVIEW_CHARS: usize = 200;
const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Fragments with at most this many characters are not chapters
    #[serde(default = "default_min_chapter_chars")]
    pub min_chapter_chars: usize,

    /// Characters of chapter content shown in upload reports
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// Content language when --language is not given (en, id)
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Package document path used when the container does not name one
    #[serde(default = "default_fallback_package_path")]
    pub fallback_package_path: String,
}

fn default_min_chapter_chars() -> usize {
    MIN_CHAPTER_CHARS
}

fn default_preview_chars() -> usize {
    DEFAULT_PREVIEW_CHARS
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_fallback_package_path() -> String {
    DEFAULT_PACKAGE_PATH.to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_chapter_chars: default_min_chapter_chars(),
            preview_chars: default_preview_chars(),
            default_language: default_language(),
            fallback_package_path: default_fallback_package_path(),
        }
    }
}

impl IngestConfig {
    /// Get the config file path: ~/.config/cli-programs/ingest.toml
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("cli-programs")
            .join("ingest.toml"))
    }

    /// Load config from file, returning default if file doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: IngestConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IngestConfig::default();
        assert_eq!(config.min_chapter_chars, 100);
        assert_eq!(config.preview_chars, 200);
        assert_eq!(config.default_language, "en");
        assert_eq!(config.fallback_package_path, "OEBPS/content.opf");
    }

    #[test]
    fn test_config_path() {
        let path = IngestConfig::config_path().unwrap();
        assert!(path.ends_with("cli-programs/ingest.toml"));
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
min_chapter_chars = 50
default_language = "id"
"#;
        let config: IngestConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.min_chapter_chars, 50);
        assert_eq!(config.default_language, "id");
        assert_eq!(config.preview_chars, 200);
    }

    #[test]
    fn test_parse_empty_config() {
        let config: IngestConfig = toml::from_str("").unwrap();
        assert_eq!(config.min_chapter_chars, 100);
        assert_eq!(config.fallback_package_path, "OEBPS/content.opf");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = IngestConfig {
            preview_chars: 80,
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: IngestConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.preview_chars, 80);
    }
}
