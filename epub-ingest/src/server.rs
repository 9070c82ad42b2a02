//! Upload endpoint semantics: authorization gate, field validation and the
//! JSON envelope returned to the admin client.

use log::{error, info};
use serde_json::{Value, json};
use shelf_store::{Authorizer, Backend, Language, ObjectStore, RecordStore, UserIdentity};

use crate::assets::StoreSink;
use crate::error::{IngestError, Result};
use crate::ingest::{IngestReport, IngestRequest, ParseSettings, ingest};

/// An upload as received from the client; every field may be absent
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// Raw `Authorization` header, usually `Bearer <token>`
    pub authorization: Option<String>,
    pub epub: Option<Vec<u8>>,
    pub novel_id: Option<String>,
    pub language: Option<String>,
}

/// Status code plus JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    /// Success envelope around an ingestion report
    pub fn ok(report: &IngestReport) -> Self {
        Self {
            status: 200,
            body: json!({
                "success": true,
                "data": report,
                "chaptersCount": report.chapters_count,
            }),
        }
    }

    fn from_error(err: &IngestError) -> Self {
        let body = match err {
            IngestError::InvalidArchive(e) => json!({
                "error": "Invalid EPUB file - could not unzip",
                "details": e.to_string(),
            }),
            IngestError::Unauthenticated(_) => json!({ "error": "Unauthorized" }),
            IngestError::Store(e) => json!({
                "error": "Failed to parse EPUB",
                "details": e.to_string(),
            }),
            other => json!({ "error": other.to_string() }),
        };

        Self {
            status: err.status_code(),
            body,
        }
    }
}

/// Handles EPUB uploads against one set of stores
pub struct UploadService<'a> {
    authorizer: &'a dyn Authorizer,
    objects: &'a dyn ObjectStore,
    records: &'a dyn RecordStore,
    settings: ParseSettings,
    default_language: Language,
}

impl<'a> UploadService<'a> {
    pub fn new(
        authorizer: &'a dyn Authorizer,
        objects: &'a dyn ObjectStore,
        records: &'a dyn RecordStore,
        settings: ParseSettings,
    ) -> Self {
        Self {
            authorizer,
            objects,
            records,
            settings,
            default_language: Language::default(),
        }
    }

    /// Service over a configured backend
    pub fn for_backend(
        backend: &'a Backend,
        settings: ParseSettings,
        default_language: Language,
    ) -> Self {
        Self::new(
            backend.authorizer.as_ref(),
            backend.objects.as_ref(),
            backend.records.as_ref(),
            settings,
        )
        .with_default_language(default_language)
    }

    /// Language used when the request names none
    pub fn with_default_language(mut self, language: Language) -> Self {
        self.default_language = language;
        self
    }

    /// Run one upload to completion; never fails, errors become responses
    pub async fn handle(&self, request: UploadRequest) -> Response {
        match self.process(request).await {
            Ok(report) => Response::ok(&report),
            Err(e) => {
                error!("EPUB upload rejected: {}", e);
                Response::from_error(&e)
            }
        }
    }

    /// Authorization first, then field validation, then ingestion
    pub async fn process(&self, request: UploadRequest) -> Result<IngestReport> {
        self.process_with_progress(request, |_, _| {}).await
    }

    /// Like [`process`](Self::process), reporting `(done, total)` chapters as they are stored
    pub async fn process_with_progress(
        &self,
        request: UploadRequest,
        on_progress: impl FnMut(usize, usize),
    ) -> Result<IngestReport> {
        let user = self.authorize(request.authorization.as_deref()).await?;

        let epub = request
            .epub
            .filter(|bytes| !bytes.is_empty())
            .ok_or(IngestError::MissingField("epub"))?;
        let novel_id = request
            .novel_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(IngestError::MissingField("novelId"))?;
        let language = match request.language.as_deref().map(str::trim) {
            None | Some("") => self.default_language,
            Some(code) => Language::from_code(code)
                .map_err(|_| IngestError::UnsupportedLanguage(code.to_string()))?,
        };

        info!("Upload by {} for novel {}", user.id, novel_id);

        let sink = StoreSink::new(self.objects);
        let request = IngestRequest {
            bytes: &epub,
            novel_id: &novel_id,
            language,
        };
        ingest(&request, &sink, self.records, &self.settings, on_progress).await
    }

    /// Resolve the bearer token to an admin user
    pub async fn authorize(&self, header: Option<&str>) -> Result<UserIdentity> {
        let header = header.ok_or(IngestError::MissingAuthorization)?;
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        if token.is_empty() {
            return Err(IngestError::Unauthenticated("empty token".to_string()));
        }

        let user = self
            .authorizer
            .authenticate(token)
            .await
            .map_err(|e| IngestError::Unauthenticated(e.to_string()))?;

        if !self.authorizer.is_admin(&user.id).await? {
            return Err(IngestError::Forbidden);
        }

        Ok(user)
    }
}
