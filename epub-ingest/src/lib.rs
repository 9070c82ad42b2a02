//! EPUB ingestion for novel-shelf
//!
//! Unpacks an EPUB, reads its package document with targeted pattern
//! matching, reconstructs reading order, rehosts embedded images and
//! produces numbered chapters ready for the record store.

pub mod archive;
pub mod assets;
pub mod chapters;
pub mod config;
pub mod error;
pub mod ingest;
pub mod markup;
pub mod package;
pub mod server;

#[cfg(test)]
mod test_support;

pub use archive::{ArchiveSource, EpubArchive};
pub use assets::{AssetSink, NoopSink, RehostOutcome, StoreSink};
pub use chapters::{Chapter, ChapterExtractor, ExtractionMode, ExtractionStats};
pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use ingest::{
    IngestReport, IngestRequest, ParseSettings, ParsedBook, ingest, parse_epub, parse_local,
};
pub use package::{Package, PackageMetadata};
pub use server::{Response, UploadRequest, UploadService};
