use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Content language of a chapter write
///
/// Each language maps to its own content column on the chapter record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Id,
}

impl Language {
    /// Parse a language code (case-insensitive)
    pub fn from_code(code: &str) -> Result<Self> {
        match code.trim().to_lowercase().as_str() {
            "en" => Ok(Self::En),
            "id" => Ok(Self::Id),
            other => Err(StoreError::UnsupportedLanguage(other.to_string())),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Id => "id",
        }
    }

    /// Name of the chapter column holding content in this language
    pub fn content_field(&self) -> &'static str {
        match self {
            Self::En => "content_en",
            Self::Id => "content_id",
        }
    }
}

/// Fields written for one chapter upsert
#[derive(Debug, Clone)]
pub struct ChapterWrite {
    pub title: String,
    pub language: Language,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// Result of a chapter upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// A stored chapter, as read back from a record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub novel_id: String,
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub content_en: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChapterRecord {
    /// Build a fresh record from a write
    pub fn from_write(novel_id: &str, number: u32, write: &ChapterWrite) -> Self {
        let mut record = Self {
            novel_id: novel_id.to_string(),
            number,
            title: String::new(),
            content_en: None,
            content_id: None,
            updated_at: None,
        };
        record.apply(write);
        record
    }

    /// Overwrite title, the language's content column and the timestamp
    pub fn apply(&mut self, write: &ChapterWrite) {
        self.title = write.title.clone();
        *self.content_mut(write.language) = Some(write.content.clone());
        self.updated_at = Some(write.updated_at);
    }

    pub fn content(&self, language: Language) -> Option<&str> {
        match language {
            Language::En => self.content_en.as_deref(),
            Language::Id => self.content_id.as_deref(),
        }
    }

    fn content_mut(&mut self, language: Language) -> &mut Option<String> {
        match language {
            Language::En => &mut self.content_en,
            Language::Id => &mut self.content_id,
        }
    }
}

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub email: Option<String>,
}

/// Blob storage returning publicly reachable URLs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `name` (overwriting any previous object) and return its public URL
    async fn put(&self, name: &str, bytes: &[u8], content_type: &str) -> Result<String>;

    /// Get the store name for display
    fn name(&self) -> &'static str;
}

/// Structured storage for novels and their chapters
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Update the chapter keyed by `(novel_id, number)` if it exists, else insert it
    async fn upsert_chapter(
        &self,
        novel_id: &str,
        number: u32,
        write: &ChapterWrite,
    ) -> Result<UpsertOutcome>;

    /// Set the novel's cover URL
    async fn update_novel_cover(&self, novel_id: &str, cover_url: &str) -> Result<()>;

    /// Read a chapter back
    async fn get_chapter(&self, novel_id: &str, number: u32) -> Result<Option<ChapterRecord>>;

    /// Get the store name for display
    fn name(&self) -> &'static str;
}

/// Token verification and role lookup for the upload endpoint
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Resolve a bearer token to a user
    async fn authenticate(&self, token: &str) -> Result<UserIdentity>;

    /// Whether the user holds the admin role
    async fn is_admin(&self, user_id: &str) -> Result<bool>;
}
