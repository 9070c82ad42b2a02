//! Ingestion orchestration: parse, rehost, persist.

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use shelf_store::{ChapterWrite, Language, RecordStore, UpsertOutcome};

use crate::archive::{ArchiveSource, EpubArchive};
use crate::assets::{AssetRehoster, AssetSink, RehostOutcome};
use crate::chapters::{Chapter, ChapterExtractor, ExtractionMode, ExtractionStats};
use crate::config::IngestConfig;
use crate::error::Result;
use crate::package::{
    DEFAULT_TITLE, Package, PackageLocation, PackageMetadata, resolve_container,
};

/// Knobs shared by every ingestion entry point
#[derive(Debug, Clone)]
pub struct ParseSettings {
    pub min_chapter_chars: usize,
    pub preview_chars: usize,
    pub fallback_package_path: String,
}

impl Default for ParseSettings {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for ParseSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            min_chapter_chars: config.min_chapter_chars,
            preview_chars: config.preview_chars,
            fallback_package_path: config.fallback_package_path.clone(),
        }
    }
}

/// A parsed book with images already rehosted
#[derive(Debug, Clone)]
pub struct ParsedBook {
    pub metadata: PackageMetadata,
    pub chapters: Vec<Chapter>,
    pub cover_url: Option<String>,
    pub mode: ExtractionMode,
    pub stats: ExtractionStats,
    pub assets: AssetSummary,
    /// Where the package document was looked for
    pub package: PackageLocation,
}

/// Image rehosting counters for one call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSummary {
    pub uploaded: usize,
    pub reused: usize,
    pub missing: usize,
    pub failed: usize,
}

impl AssetSummary {
    fn record(&mut self, outcome: &RehostOutcome) {
        match outcome {
            RehostOutcome::Uploaded(_) => self.uploaded += 1,
            RehostOutcome::Cached(_) => self.reused += 1,
            RehostOutcome::Missing(_) => self.missing += 1,
            RehostOutcome::UploadFailed { .. } => self.failed += 1,
            RehostOutcome::External | RehostOutcome::Skipped => {}
        }
    }
}

/// Parse an EPUB blob into chapters, rehosting images through `sink`
///
/// Only an unreadable ZIP fails; every other defect degrades the result.
pub async fn parse_epub(
    bytes: &[u8],
    novel_id: &str,
    sink: &dyn AssetSink,
    settings: &ParseSettings,
) -> Result<ParsedBook> {
    let archive = EpubArchive::from_bytes(bytes)?;
    let location = resolve_container(&archive, &settings.fallback_package_path);

    let package = archive.entry_text(&location.path).map(Package::parse);
    match (&package, location.from_container) {
        (None, true) => warn!("Package document {} not found", location.path),
        (None, false) => warn!("No container.xml and no package at {}", location.path),
        _ => {}
    }

    let metadata = package
        .as_ref()
        .map(|p| p.metadata.clone())
        .unwrap_or_default();

    let extraction = ChapterExtractor::new(settings.min_chapter_chars).extract(
        &archive,
        package.as_ref().map(|p| (p, location.dir.as_str())),
    );
    debug!(
        "Extracted {} chapters ({:?}, {:?})",
        extraction.chapters.len(),
        extraction.mode,
        extraction.stats
    );

    let media_types = package
        .as_ref()
        .map(|p| p.media_types(&location.dir))
        .unwrap_or_default();
    let mut rehoster = AssetRehoster::new(&archive, sink, novel_id, media_types);

    let mut chapters = extraction.chapters;
    let mut assets = AssetSummary::default();
    for chapter in &mut chapters {
        for reference in rehoster.rehost_chapter(chapter).await {
            assets.record(&reference.outcome);
        }
    }

    let cover_url = match package.as_ref().and_then(|p| p.cover(&location.dir)) {
        Some(cover) => rehoster.rehost_cover(&cover).await,
        None => None,
    };

    info!(
        "Parsed \"{}\": {} chapters, {} images uploaded",
        metadata.title,
        chapters.len(),
        assets.uploaded
    );

    Ok(ParsedBook {
        metadata,
        chapters,
        cover_url,
        mode: extraction.mode,
        stats: extraction.stats,
        assets,
        package: location,
    })
}

/// Local parse: no authorization and no record store
///
/// When the package has no title, the file stem stands in.
pub async fn parse_local(
    bytes: &[u8],
    file_stem: &str,
    sink: &dyn AssetSink,
    settings: &ParseSettings,
) -> Result<ParsedBook> {
    let mut book = parse_epub(bytes, file_stem, sink, settings).await?;
    if book.metadata.title == DEFAULT_TITLE && !file_stem.is_empty() {
        book.metadata.title = file_stem.to_string();
    }
    Ok(book)
}

/// Per-chapter entry of an ingestion report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterSummary {
    pub number: u32,
    pub title: String,
    pub content_preview: String,
    pub images: Vec<String>,
}

/// Result of a persisted ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub title: String,
    pub author: String,
    pub description: String,
    pub chapters: Vec<ChapterSummary>,
    pub cover_url: Option<String>,
    pub chapters_count: usize,
    #[serde(skip)]
    pub inserted: usize,
    #[serde(skip)]
    pub updated: usize,
    #[serde(skip)]
    pub failed: usize,
}

/// First `chars` characters followed by an ellipsis
pub fn preview(content: &str, chars: usize) -> String {
    let mut preview: String = content.chars().take(chars).collect();
    preview.push_str("...");
    preview
}

/// What to ingest and where it belongs
#[derive(Debug, Clone)]
pub struct IngestRequest<'a> {
    pub bytes: &'a [u8],
    pub novel_id: &'a str,
    pub language: Language,
}

/// Parse, rehost images, upsert every chapter, then set the cover
///
/// Chapters are written one at a time in order. A failed chapter write is
/// logged and counted; it does not stop the rest. `on_progress` receives
/// `(written, total)` after each attempt.
pub async fn ingest(
    request: &IngestRequest<'_>,
    sink: &dyn AssetSink,
    records: &dyn RecordStore,
    settings: &ParseSettings,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<IngestReport> {
    info!(
        "Processing EPUB for novel {}, language: {}",
        request.novel_id,
        request.language.code()
    );

    let book = parse_epub(request.bytes, request.novel_id, sink, settings).await?;
    let total = book.chapters.len();
    let (mut inserted, mut updated, mut failed) = (0, 0, 0);

    for (done, chapter) in book.chapters.iter().enumerate() {
        let write = ChapterWrite {
            title: chapter.title.clone(),
            language: request.language,
            content: chapter.content.clone(),
            updated_at: Utc::now(),
        };

        match records
            .upsert_chapter(request.novel_id, chapter.number, &write)
            .await
        {
            Ok(UpsertOutcome::Inserted) => inserted += 1,
            Ok(UpsertOutcome::Updated) => updated += 1,
            Err(e) => {
                warn!("Error writing chapter {}: {}", chapter.number, e);
                failed += 1;
            }
        }
        on_progress(done + 1, total);
    }

    if let Some(url) = &book.cover_url {
        if let Err(e) = records.update_novel_cover(request.novel_id, url).await {
            warn!("Error updating cover for {}: {}", request.novel_id, e);
        }
    }

    info!(
        "Ingested {} chapters into {} ({} inserted, {} updated, {} failed)",
        total,
        records.name(),
        inserted,
        updated,
        failed
    );

    Ok(IngestReport {
        title: book.metadata.title,
        author: book.metadata.author,
        description: book.metadata.description,
        chapters: book
            .chapters
            .iter()
            .map(|c| ChapterSummary {
                number: c.number,
                title: c.title.clone(),
                content_preview: preview(&c.content, settings.preview_chars),
                images: c.images.clone(),
            })
            .collect(),
        cover_url: book.cover_url,
        chapters_count: total,
        inserted,
        updated,
        failed,
    })
}
