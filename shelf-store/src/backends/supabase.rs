//! Supabase backend
//!
//! Direct HTTP implementation against the Storage, PostgREST and Auth APIs of
//! a Supabase project, authenticated with the service role key.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::store::{
    Authorizer, ChapterRecord, ChapterWrite, ObjectStore, RecordStore, UpsertOutcome,
    UserIdentity,
};

const CHAPTERS_TABLE: &str = "chapters";
const NOVELS_TABLE: &str = "novels";
const ROLES_TABLE: &str = "user_roles";
const ADMIN_ROLE: &str = "admin";

/// One Supabase project acting as object store, record store and authorizer
pub struct SupabaseBackend {
    base_url: String,
    api_key: String,
    bucket: String,
    client: Client,
}

impl SupabaseBackend {
    /// Create a new Supabase backend
    pub fn new(base_url: &str, api_key: String, bucket: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            bucket,
            client,
        })
    }

    /// Public URL of an object in the configured bucket
    pub fn public_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, name
        )
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Attach the service key headers
    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(|e| StoreError::ApiError {
            message: format!("Request failed: {}", e),
            status_code: None,
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorResponse>(&error_text) {
                Ok(error_response) => error_response.into_message(error_text),
                Err(_) => error_text,
            };

            if status.as_u16() == 401 {
                return Err(StoreError::Unauthorized(message));
            }

            return Err(StoreError::ApiError {
                message,
                status_code: Some(status.as_u16()),
            });
        }

        Ok(response)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        response.json().await.map_err(|e| StoreError::ApiError {
            message: format!("Failed to parse response: {}", e),
            status_code: None,
        })
    }
}

// Supabase response types

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

impl ErrorResponse {
    fn into_message(self, raw: String) -> String {
        self.message.or(self.msg).or(self.error).unwrap_or(raw)
    }
}

#[derive(Debug, Deserialize)]
struct RowId {
    id: Value,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoleRow {
    #[allow(dead_code)]
    role: String,
}

/// PostgREST equality filter value
fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl ObjectStore for SupabaseBackend {
    async fn put(&self, name: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, name
        );

        let request = self
            .authed(self.client.post(&url))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes.to_vec());
        self.send(request).await?;

        debug!("Uploaded {} ({} bytes) to bucket {}", name, bytes.len(), self.bucket);
        Ok(self.public_url(name))
    }

    fn name(&self) -> &'static str {
        "supabase-storage"
    }
}

#[async_trait]
impl RecordStore for SupabaseBackend {
    async fn upsert_chapter(
        &self,
        novel_id: &str,
        number: u32,
        write: &ChapterWrite,
    ) -> Result<UpsertOutcome> {
        let lookup = self
            .authed(self.client.get(self.rest_url(CHAPTERS_TABLE)))
            .query(&[
                ("select", "id".to_string()),
                ("novel_id", eq(novel_id)),
                ("number", eq(number)),
                ("limit", "1".to_string()),
            ]);
        let existing: Vec<RowId> = Self::json(self.send(lookup).await?).await?;

        let content_field = write.language.content_field();
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!(write.title));
        fields.insert(content_field.to_string(), json!(write.content));

        match existing.into_iter().next() {
            Some(row) => {
                fields.insert("updated_at".to_string(), json!(write.updated_at.to_rfc3339()));
                let id = match &row.id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let request = self
                    .authed(self.client.patch(self.rest_url(CHAPTERS_TABLE)))
                    .query(&[("id", eq(id))])
                    .json(&fields);
                self.send(request).await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                fields.insert("novel_id".to_string(), json!(novel_id));
                fields.insert("number".to_string(), json!(number));
                let request = self
                    .authed(self.client.post(self.rest_url(CHAPTERS_TABLE)))
                    .json(&fields);
                self.send(request).await?;
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn update_novel_cover(&self, novel_id: &str, cover_url: &str) -> Result<()> {
        let request = self
            .authed(self.client.patch(self.rest_url(NOVELS_TABLE)))
            .query(&[("id", eq(novel_id))])
            .json(&json!({ "cover_url": cover_url }));
        self.send(request).await?;
        Ok(())
    }

    async fn get_chapter(&self, novel_id: &str, number: u32) -> Result<Option<ChapterRecord>> {
        let request = self
            .authed(self.client.get(self.rest_url(CHAPTERS_TABLE)))
            .query(&[
                (
                    "select",
                    "novel_id,number,title,content_en,content_id,updated_at".to_string(),
                ),
                ("novel_id", eq(novel_id)),
                ("number", eq(number)),
                ("limit", "1".to_string()),
            ]);
        let rows: Vec<ChapterRecord> = Self::json(self.send(request).await?).await?;
        Ok(rows.into_iter().next())
    }

    fn name(&self) -> &'static str {
        "supabase-rest"
    }
}

#[async_trait]
impl Authorizer for SupabaseBackend {
    async fn authenticate(&self, token: &str) -> Result<UserIdentity> {
        let request = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(token);
        let user: AuthUser = Self::json(self.send(request).await?).await?;

        Ok(UserIdentity {
            id: user.id,
            email: user.email,
        })
    }

    async fn is_admin(&self, user_id: &str) -> Result<bool> {
        let request = self
            .authed(self.client.get(self.rest_url(ROLES_TABLE)))
            .query(&[
                ("select", "role".to_string()),
                ("user_id", eq(user_id)),
                ("role", eq(ADMIN_ROLE)),
                ("limit", "1".to_string()),
            ]);
        let rows: Vec<RoleRow> = Self::json(self.send(request).await?).await?;
        Ok(!rows.is_empty())
    }
}
