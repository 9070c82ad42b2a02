//! Image rehosting: upload embedded images once per ingestion and point
//! chapter markup at the public copies.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use shelf_store::{ObjectStore, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::archive::ArchiveSource;
use crate::chapters::Chapter;
use crate::package::{CoverReference, parent_dir};

static RE_IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\s(?:[^>]*?\s)?src\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*>"#).unwrap()
});
static RE_PARENT_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^/]+/\.\./").unwrap());

static UPLOAD_COUNTER: AtomicU64 = AtomicU64::new(0);

const DEFAULT_IMAGE_EXT: &str = "jpg";

/// Destination for rehosted assets
#[async_trait]
pub trait AssetSink: Send + Sync {
    /// Store an asset and return the URL markup should point at
    async fn store(
        &self,
        name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StoreError>;

    /// Whether assets should be offered to this sink at all
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Sink that keeps everything in place (local parsing)
pub struct NoopSink;

#[async_trait]
impl AssetSink for NoopSink {
    async fn store(
        &self,
        _name: &str,
        _bytes: &[u8],
        _content_type: &str,
    ) -> Result<String, StoreError> {
        Err(StoreError::Disabled)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Sink uploading to an object store
pub struct StoreSink<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> StoreSink<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AssetSink for StoreSink<'_> {
    async fn store(
        &self,
        name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StoreError> {
        self.store.put(name, bytes, content_type).await
    }
}

/// Object names for one novel's assets
#[derive(Debug, Clone)]
pub struct AssetNamer {
    novel_id: String,
}

impl AssetNamer {
    pub fn new(novel_id: &str) -> Self {
        Self {
            novel_id: novel_id.to_string(),
        }
    }

    /// `images/{novel}/{millis}_{token}.{ext}`, unique per call
    pub fn image_name(&self, archive_path: &str) -> String {
        format!(
            "images/{}/{}_{}.{}",
            self.novel_id,
            Utc::now().timestamp_millis(),
            unique_token(&self.novel_id, archive_path),
            extension(archive_path)
        )
    }

    /// `covers/{novel}_cover.{subtype}`; re-ingesting replaces the previous cover
    pub fn cover_name(&self, media_type: &str) -> String {
        let subtype = media_type
            .split('/')
            .nth(1)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_IMAGE_EXT);
        format!("covers/{}_cover.{}", self.novel_id, subtype)
    }
}

/// Nine hex characters, distinct across calls within and between processes
fn unique_token(novel_id: &str, archive_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(novel_id.as_bytes());
    hasher.update(archive_path.as_bytes());
    hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(UPLOAD_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    format!("{:x}", hasher.finalize())[..9].to_string()
}

fn extension(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => DEFAULT_IMAGE_EXT.to_string(),
    }
}

fn image_content_type(path: &str) -> String {
    match extension(path).as_str() {
        "jpg" => "image/jpeg".to_string(),
        "svg" => "image/svg+xml".to_string(),
        ext => format!("image/{}", ext),
    }
}

/// Archive path of an `<img src>` relative to the chapter document
///
/// Returns `None` for sources that are not archive-relative (`http…`,
/// protocol-relative, `data:` and root-absolute). Normalization is a single
/// pass: `/./` segments are dropped and each `segment/../` is removed once,
/// so deeper traversal like `a/b/../../c` is not fully collapsed.
pub fn resolve_image_path(chapter_path: &str, src: &str) -> Option<String> {
    let src = src.trim();
    let lower = src.to_ascii_lowercase();
    if src.is_empty()
        || src.starts_with('/')
        || lower.starts_with("http")
        || lower.starts_with("data:")
        || src.contains("://")
    {
        return None;
    }

    let joined = format!("{}{}", parent_dir(chapter_path), src).replace("/./", "/");
    let joined = joined.strip_prefix("./").unwrap_or(&joined);
    Some(RE_PARENT_SEGMENT.replace_all(joined, "").into_owned())
}

/// Replace every quoted occurrence of `src` in the fragment with `url`
///
/// Covers `<img src>` as well as links and other attributes naming the same
/// file. Only whole quoted values match, so `"a.png"` never rewrites inside
/// `"ba.png"` or inside an already rehosted URL.
fn rewrite_src(content: &str, src: &str, url: &str) -> String {
    content
        .replace(&format!("\"{}\"", src), &format!("\"{}\"", url))
        .replace(&format!("'{}'", src), &format!("'{}'", url))
}

/// Image sources in document order
pub fn image_sources(content: &str) -> Vec<String> {
    RE_IMG_SRC
        .captures_iter(content)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .filter(|src| !src.trim().is_empty())
        .collect()
}

/// Archive path → public URL, scoped to one ingestion call
#[derive(Debug, Default)]
pub struct UploadCache {
    urls: HashMap<String, String>,
}

impl UploadCache {
    pub fn get(&self, archive_path: &str) -> Option<&str> {
        self.urls.get(archive_path).map(String::as_str)
    }

    pub fn insert(&mut self, archive_path: String, url: String) {
        self.urls.insert(archive_path, url);
    }

    /// Distinct paths uploaded so far
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// What happened to one `<img>` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RehostOutcome {
    /// Uploaded now; markup rewritten
    Uploaded(String),
    /// Already uploaded earlier in this call; markup rewritten
    Cached(String),
    /// Absolute or external source, left alone
    External,
    /// Resolved path not in the archive, left alone
    Missing(String),
    /// Upload failed; markup left unrewritten
    UploadFailed { path: String, error: String },
    /// Sink disabled
    Skipped,
}

/// One `<img src>` and its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub src: String,
    pub outcome: RehostOutcome,
}

/// Rehosts images for the chapters of one ingestion call
pub struct AssetRehoster<'a, A: ArchiveSource + ?Sized> {
    archive: &'a A,
    sink: &'a dyn AssetSink,
    namer: AssetNamer,
    /// Archive path → manifest media type
    media_types: HashMap<String, String>,
    cache: UploadCache,
}

impl<'a, A: ArchiveSource + ?Sized> AssetRehoster<'a, A> {
    pub fn new(
        archive: &'a A,
        sink: &'a dyn AssetSink,
        novel_id: &str,
        media_types: HashMap<String, String>,
    ) -> Self {
        Self {
            archive,
            sink,
            namer: AssetNamer::new(novel_id),
            media_types,
            cache: UploadCache::default(),
        }
    }

    pub fn cache(&self) -> &UploadCache {
        &self.cache
    }

    /// Rewrite a chapter's images in place, recording public URLs in `chapter.images`
    ///
    /// Uploads run one at a time in document order, so a path referenced
    /// twice is uploaded once.
    pub async fn rehost_chapter(&mut self, chapter: &mut Chapter) -> Vec<ImageReference> {
        let sources = image_sources(&chapter.content);
        let mut references = Vec::with_capacity(sources.len());

        for src in sources {
            let outcome = self.rehost_source(&chapter.source_path, &src).await;
            if let RehostOutcome::Uploaded(url) | RehostOutcome::Cached(url) = &outcome {
                chapter.content = rewrite_src(&chapter.content, &src, url);
                chapter.images.push(url.clone());
            }
            references.push(ImageReference { src, outcome });
        }

        references
    }

    async fn rehost_source(&mut self, chapter_path: &str, src: &str) -> RehostOutcome {
        if !self.sink.is_enabled() {
            return RehostOutcome::Skipped;
        }

        let Some(path) = resolve_image_path(chapter_path, src) else {
            return RehostOutcome::External;
        };

        if let Some(url) = self.cache.get(&path) {
            return RehostOutcome::Cached(url.to_string());
        }

        let Some(bytes) = self.archive.entry(&path) else {
            debug!("Image {} (from {}) not in archive", path, chapter_path);
            return RehostOutcome::Missing(path);
        };

        let name = self.namer.image_name(&path);
        let content_type = self
            .media_types
            .get(&path)
            .cloned()
            .unwrap_or_else(|| image_content_type(&path));

        match self.sink.store(&name, bytes, &content_type).await {
            Ok(url) => {
                debug!("Rehosted {} as {}", path, url);
                self.cache.insert(path, url.clone());
                RehostOutcome::Uploaded(url)
            }
            Err(e) => {
                warn!("Image upload failed for {}: {}", path, e);
                RehostOutcome::UploadFailed {
                    path,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Upload the cover image; `None` when absent from the archive or the upload fails
    pub async fn rehost_cover(&mut self, cover: &CoverReference) -> Option<String> {
        if !self.sink.is_enabled() {
            return None;
        }

        let Some(bytes) = self.archive.entry(&cover.resolved_path) else {
            debug!("Cover {} not in archive", cover.resolved_path);
            return None;
        };

        let name = self.namer.cover_name(&cover.media_type);
        let content_type = if cover.media_type.is_empty() {
            image_content_type(&cover.resolved_path)
        } else {
            cover.media_type.clone()
        };

        match self.sink.store(&name, bytes, &content_type).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Cover upload failed for {}: {}", cover.resolved_path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::EpubArchive;
    use crate::test_support::build_zip;
    use shelf_store::MemoryObjectStore;

    fn chapter(number: u32, source_path: &str, content: &str) -> Chapter {
        Chapter {
            number,
            title: format!("Chapter {}", number),
            content: content.to_string(),
            images: Vec::new(),
            source_path: source_path.to_string(),
        }
    }

    fn archive() -> EpubArchive {
        EpubArchive::from_bytes(&build_zip(&[
            ("OEBPS/Images/a.png", b"png-a".as_slice()),
            ("OEBPS/Images/b.jpg", b"jpg-b".as_slice()),
            ("OEBPS/Images/cover.jpeg", b"cover".as_slice()),
        ]))
        .unwrap()
    }

    #[test]
    fn test_resolve_image_path() {
        assert_eq!(
            resolve_image_path("OEBPS/Text/ch1.xhtml", "../Images/a.png").as_deref(),
            Some("OEBPS/Images/a.png")
        );
        assert_eq!(
            resolve_image_path("OEBPS/ch1.xhtml", "./Images/a.png").as_deref(),
            Some("OEBPS/Images/a.png")
        );
        assert_eq!(
            resolve_image_path("ch1.xhtml", "./a.png").as_deref(),
            Some("a.png")
        );
        assert_eq!(resolve_image_path("OEBPS/ch1.xhtml", "/Images/a.png"), None);
        assert_eq!(resolve_image_path("OEBPS/ch1.xhtml", "https://x.org/a.png"), None);
        assert_eq!(resolve_image_path("OEBPS/ch1.xhtml", "data:image/png;base64,AAA"), None);
    }

    #[test]
    fn test_resolve_image_path_single_pass() {
        // One level collapses; the second `..` survives the single pass
        assert_eq!(
            resolve_image_path("OEBPS/Text/Part/ch1.xhtml", "../../Images/a.png").as_deref(),
            Some("OEBPS/Text/../Images/a.png")
        );
    }

    #[test]
    fn test_image_sources() {
        let html = r#"<p><img alt="x" src="a.png"/></p><img data-src="lazy.png" src='b.png'><IMG SRC="c.png">"#;
        assert_eq!(image_sources(html), vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn test_rewrite_only_touches_whole_quoted_values() {
        let html = r#"<p>see a.png</p><img src="a.png"/><img src="ba.png"/><img src='a.png'>"#;
        assert_eq!(
            rewrite_src(html, "a.png", "https://cdn/x.png"),
            r#"<p>see a.png</p><img src="https://cdn/x.png"/><img src="ba.png"/><img src='https://cdn/x.png'>"#
        );
    }

    #[tokio::test]
    async fn test_link_to_rehosted_image_rewritten() {
        let archive = archive();
        let store = MemoryObjectStore::new();
        let sink = StoreSink::new(&store);
        let mut rehoster = AssetRehoster::new(&archive, &sink, "n1", HashMap::new());

        let html = r#"<a href="../Images/a.png"><img src="../Images/a.png"/></a>"#;
        let mut ch = chapter(1, "OEBPS/Text/ch1.xhtml", html);
        rehoster.rehost_chapter(&mut ch).await;

        let url = &ch.images[0];
        assert_eq!(
            ch.content,
            format!(r#"<a href="{url}"><img src="{url}"/></a>"#)
        );
        assert!(!ch.content.contains("../Images/a.png"));
    }

    #[tokio::test]
    async fn test_repeated_src_in_one_chapter() {
        let archive = archive();
        let store = MemoryObjectStore::new();
        let sink = StoreSink::new(&store);
        let mut rehoster = AssetRehoster::new(&archive, &sink, "n1", HashMap::new());

        let html = r#"<img src="Images/a.png"/><p>again</p><img src="Images/a.png"/>"#;
        let mut ch = chapter(1, "OEBPS/ch1.xhtml", html);
        let refs = rehoster.rehost_chapter(&mut ch).await;

        assert_eq!(store.call_count(), 1);
        assert!(matches!(refs[0].outcome, RehostOutcome::Uploaded(_)));
        assert!(matches!(refs[1].outcome, RehostOutcome::Cached(_)));
        // One entry per reference
        assert_eq!(ch.images.len(), 2);
        assert_eq!(ch.images[0], ch.images[1]);
        let url = &ch.images[0];
        assert_eq!(
            ch.content,
            format!(r#"<img src="{url}"/><p>again</p><img src="{url}"/>"#)
        );
    }

    #[test]
    fn test_names() {
        let namer = AssetNamer::new("n1");
        let name = namer.image_name("OEBPS/Images/Photo.PNG");
        assert!(name.starts_with("images/n1/"));
        assert!(name.ends_with(".png"));
        assert_ne!(name, namer.image_name("OEBPS/Images/Photo.PNG"));

        assert_eq!(namer.cover_name("image/jpeg"), "covers/n1_cover.jpeg");
        assert_eq!(namer.cover_name(""), "covers/n1_cover.jpg");
        assert_eq!(extension("OEBPS/Images/noext"), "jpg");
    }

    #[tokio::test]
    async fn test_same_image_across_chapters_uploaded_once() {
        let archive = archive();
        let store = MemoryObjectStore::new();
        let sink = StoreSink::new(&store);
        let mut rehoster = AssetRehoster::new(&archive, &sink, "n1", HashMap::new());

        let mut first = chapter(1, "OEBPS/Text/ch1.xhtml", r#"<img src="../Images/a.png"/>"#);
        let mut second = chapter(2, "OEBPS/ch2.xhtml", r#"<p><img src="Images/a.png"></p>"#);
        rehoster.rehost_chapter(&mut first).await;
        let refs = rehoster.rehost_chapter(&mut second).await;

        assert_eq!(store.call_count(), 1);
        assert_eq!(first.images.len(), 1);
        assert_eq!(first.images, second.images);
        assert!(matches!(refs[0].outcome, RehostOutcome::Cached(_)));
        assert_eq!(
            second.content,
            format!(r#"<p><img src="{}"></p>"#, first.images[0])
        );
        assert_eq!(store.objects()[0].bytes, b"png-a");
        assert_eq!(store.objects()[0].content_type, "image/png");
        assert_eq!(rehoster.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_external_left_untouched() {
        let archive = archive();
        let store = MemoryObjectStore::new();
        let sink = StoreSink::new(&store);
        let mut rehoster = AssetRehoster::new(&archive, &sink, "n1", HashMap::new());

        let html = r#"<img src="Images/nope.png"/><img src="https://elsewhere.org/x.png"/>"#;
        let mut ch = chapter(1, "OEBPS/ch1.xhtml", html);
        let refs = rehoster.rehost_chapter(&mut ch).await;

        assert_eq!(ch.content, html);
        assert!(ch.images.is_empty());
        assert_eq!(store.call_count(), 0);
        assert_eq!(
            refs[0].outcome,
            RehostOutcome::Missing("OEBPS/Images/nope.png".to_string())
        );
        assert_eq!(refs[1].outcome, RehostOutcome::External);
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_markup_and_retries_later() {
        let archive = archive();
        let store = MemoryObjectStore::fails_then_succeeds(1);
        let sink = StoreSink::new(&store);
        let mut rehoster = AssetRehoster::new(&archive, &sink, "n1", HashMap::new());

        let html = r#"<img src="Images/b.jpg"/>"#;
        let mut first = chapter(1, "OEBPS/ch1.xhtml", html);
        let refs = rehoster.rehost_chapter(&mut first).await;
        assert!(matches!(refs[0].outcome, RehostOutcome::UploadFailed { .. }));
        assert_eq!(first.content, html);
        assert!(first.images.is_empty());

        let mut second = chapter(2, "OEBPS/ch2.xhtml", html);
        rehoster.rehost_chapter(&mut second).await;
        assert_eq!(second.images.len(), 1);
        assert_eq!(store.call_count(), 2);
        assert_eq!(store.objects()[0].content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_noop_sink_skips_everything() {
        let archive = archive();
        let mut rehoster = AssetRehoster::new(&archive, &NoopSink, "n1", HashMap::new());

        let html = r#"<img src="Images/a.png"/>"#;
        let mut ch = chapter(1, "OEBPS/ch1.xhtml", html);
        let refs = rehoster.rehost_chapter(&mut ch).await;

        assert_eq!(refs[0].outcome, RehostOutcome::Skipped);
        assert_eq!(ch.content, html);
        let cover = CoverReference {
            manifest_id: "cover".into(),
            resolved_path: "OEBPS/Images/cover.jpeg".into(),
            media_type: "image/jpeg".into(),
        };
        assert_eq!(rehoster.rehost_cover(&cover).await, None);
    }

    #[tokio::test]
    async fn test_cover_upload() {
        let archive = archive();
        let store = MemoryObjectStore::new();
        let sink = StoreSink::new(&store);
        let mut rehoster = AssetRehoster::new(&archive, &sink, "n1", HashMap::new());

        let cover = CoverReference {
            manifest_id: "cover".into(),
            resolved_path: "OEBPS/Images/cover.jpeg".into(),
            media_type: "image/jpeg".into(),
        };
        let url = rehoster.rehost_cover(&cover).await;
        assert_eq!(url.as_deref(), Some("https://cdn.test/covers/n1_cover.jpeg"));

        let absent = CoverReference {
            resolved_path: "OEBPS/Images/none.jpeg".into(),
            ..cover
        };
        assert_eq!(rehoster.rehost_cover(&absent).await, None);
    }

    #[tokio::test]
    async fn test_manifest_media_type_preferred() {
        let archive = archive();
        let store = MemoryObjectStore::new();
        let sink = StoreSink::new(&store);
        let media_types = HashMap::from([(
            "OEBPS/Images/a.png".to_string(),
            "image/x-custom".to_string(),
        )]);
        let mut rehoster = AssetRehoster::new(&archive, &sink, "n1", media_types);

        let mut ch = chapter(1, "OEBPS/ch1.xhtml", r#"<img src="Images/a.png"/>"#);
        rehoster.rehost_chapter(&mut ch).await;
        assert_eq!(store.objects()[0].content_type, "image/x-custom");
    }
}
