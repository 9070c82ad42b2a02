//! Error taxonomy for ingestion.
//!
//! Only the variants here abort a call. Skipped fragments, a missing package
//! document and failed image uploads degrade the result instead and are
//! reported through [`crate::chapters::ExtractionStats`] and
//! [`crate::assets::RehostOutcome`].

use shelf_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid EPUB file - could not unzip: {0}")]
    InvalidArchive(#[from] zip::result::ZipError),

    #[error("No authorization header")]
    MissingAuthorization,

    #[error("Unauthorized: {0}")]
    Unauthenticated(String),

    #[error("Admin access required")]
    Forbidden,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    /// HTTP status reported by the upload endpoint
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidArchive(_) | Self::MissingField(_) | Self::UnsupportedLanguage(_) => 400,
            Self::MissingAuthorization | Self::Unauthenticated(_) => 401,
            Self::Forbidden => 403,
            Self::Store(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
