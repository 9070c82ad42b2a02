//! Storage boundary for the novel-shelf workspace
//!
//! Provides the two external stores the EPUB ingestion pipeline writes to,
//! plus the authorization lookup used by the upload endpoint:
//! - Object store (binary blobs → public URLs)
//! - Record store (chapter upserts, novel cover updates)
//! - Authorizer (token → user, admin role check)
//!
//! Backends: Supabase (storage + PostgREST + auth), local filesystem, in-memory mock.

pub mod backends;
pub mod config;
pub mod error;
pub mod store;

pub use backends::{Backend, BackendKind, SupabaseBackend, get_backend};
pub use backends::local::{JsonRecordStore, LocalObjectStore, OpenAuthorizer};
pub use backends::mock::{MemoryObjectStore, MemoryRecordStore, StaticAuthorizer, StoredObject};
pub use config::{BackendConfig, StoreConfig};
pub use error::{Result, StoreError};
pub use store::{
    Authorizer, ChapterRecord, ChapterWrite, Language, ObjectStore, RecordStore, UpsertOutcome,
    UserIdentity,
};
