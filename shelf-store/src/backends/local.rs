//! Local filesystem backend
//!
//! Objects are written below a root directory; records are kept as one JSON
//! document per novel. There are no accounts: any non-empty token is accepted
//! as the local administrator.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::store::{
    Authorizer, ChapterRecord, ChapterWrite, ObjectStore, RecordStore, UpsertOutcome,
    UserIdentity,
};

const LOCAL_USER_ID: &str = "local";

/// Object store writing into a directory
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf, public_base_url: Option<String>) -> Self {
        Self {
            root,
            public_base_url,
        }
    }

    /// Filesystem path an object name maps to
    ///
    /// Names are relative; `..` and absolute components are rejected.
    pub fn object_path(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return Err(StoreError::ConfigError(format!("Invalid object name: {}", name)));
        }
        Ok(self.root.join(relative))
    }

    fn url_for(&self, name: &str, path: &Path) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), name),
            None => format!("file://{}", path.display()),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, name: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let path = self.object_path(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        debug!("Stored {} ({}, {} bytes)", path.display(), content_type, bytes.len());
        Ok(self.url_for(name, &path))
    }

    fn name(&self) -> &'static str {
        "local-objects"
    }
}

/// Everything stored for one novel
#[derive(Debug, Default, Serialize, Deserialize)]
struct NovelDocument {
    #[serde(default)]
    cover_url: Option<String>,
    #[serde(default)]
    chapters: BTreeMap<u32, ChapterRecord>,
}

/// Record store keeping one JSON file per novel
pub struct JsonRecordStore {
    root: PathBuf,
}

impl JsonRecordStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn novel_path(&self, novel_id: &str) -> Result<PathBuf> {
        let valid = !novel_id.is_empty()
            && novel_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::ConfigError(format!("Invalid novel id: {}", novel_id)));
        }
        Ok(self.root.join(format!("{}.json", novel_id)))
    }

    async fn load(&self, novel_id: &str) -> Result<NovelDocument> {
        let path = self.novel_path(novel_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NovelDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, novel_id: &str, document: &NovelDocument) -> Result<()> {
        let path = self.novel_path(novel_id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let content = serde_json::to_vec_pretty(document)?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    /// Cover URL recorded for a novel
    pub async fn cover_url(&self, novel_id: &str) -> Result<Option<String>> {
        Ok(self.load(novel_id).await?.cover_url)
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn upsert_chapter(
        &self,
        novel_id: &str,
        number: u32,
        write: &ChapterWrite,
    ) -> Result<UpsertOutcome> {
        let mut document = self.load(novel_id).await?;

        let outcome = match document.chapters.get_mut(&number) {
            Some(existing) => {
                existing.apply(write);
                UpsertOutcome::Updated
            }
            None => {
                document
                    .chapters
                    .insert(number, ChapterRecord::from_write(novel_id, number, write));
                UpsertOutcome::Inserted
            }
        };

        self.save(novel_id, &document).await?;
        Ok(outcome)
    }

    async fn update_novel_cover(&self, novel_id: &str, cover_url: &str) -> Result<()> {
        let mut document = self.load(novel_id).await?;
        document.cover_url = Some(cover_url.to_string());
        self.save(novel_id, &document).await
    }

    async fn get_chapter(&self, novel_id: &str, number: u32) -> Result<Option<ChapterRecord>> {
        Ok(self.load(novel_id).await?.chapters.remove(&number))
    }

    fn name(&self) -> &'static str {
        "local-records"
    }
}

/// Authorizer for the local backend
pub struct OpenAuthorizer;

#[async_trait]
impl Authorizer for OpenAuthorizer {
    async fn authenticate(&self, token: &str) -> Result<UserIdentity> {
        if token.trim().is_empty() {
            return Err(StoreError::Unauthorized("empty token".to_string()));
        }
        Ok(UserIdentity {
            id: LOCAL_USER_ID.to_string(),
            email: None,
        })
    }

    async fn is_admin(&self, user_id: &str) -> Result<bool> {
        Ok(user_id == LOCAL_USER_ID)
    }
}
