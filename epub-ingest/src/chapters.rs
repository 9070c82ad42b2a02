// Chapter segmentation: spine walk, title recovery, body extraction

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::archive::ArchiveSource;
use crate::markup::TagPattern;
use crate::package::{Package, resolve_href};

/// Fragments at or below this many characters are not chapters
pub const MIN_CHAPTER_CHARS: usize = 100;

static H1: Lazy<TagPattern> = Lazy::new(|| TagPattern::new("h1"));
static H2: Lazy<TagPattern> = Lazy::new(|| TagPattern::new("h2"));
static TITLE: Lazy<TagPattern> = Lazy::new(|| TagPattern::new("title"));

static RE_XML_DECL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<\?xml[^>]*\?>").unwrap());
static RE_DOCTYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<!DOCTYPE[^>]*>").unwrap());
static RE_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body(?:\s[^>]*)?>(.*)</body\s*>").unwrap());
static RE_HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</?html(?:\s[^>]*)?>").unwrap());
static RE_HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<head(?:\s[^>]*)?>.*?</head\s*>").unwrap());
static RE_META: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<meta(?:\s[^>]*)?>").unwrap());
static RE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<link(?:\s[^>]*)?>").unwrap());

/// A chapter produced by extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
    /// Dense, 1-based, in acceptance order
    pub number: u32,
    pub title: String,
    /// HTML fragment (body content)
    pub content: String,
    /// Public URLs of rehosted images, in reference order
    pub images: Vec<String>,
    /// Archive path of the source document
    #[serde(skip)]
    pub source_path: String,
}

/// How the chapter list was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Declared reading order from the package spine
    Spine,
    /// Every HTML entry in lexicographic path order. Best effort: path order
    /// need not match reading order, and titles are always synthesized.
    FlatFileFallback,
}

/// Counters for documents that did not become chapters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    /// Documents considered
    pub attempted: usize,
    /// Spine targets absent from the archive or not decodable
    pub missing: usize,
    /// Spine items that are not markup (images, stylesheets)
    pub non_html: usize,
    /// Fragments rejected by the length threshold
    pub too_short: usize,
}

/// Result of one extraction pass
#[derive(Debug, Clone)]
pub struct Extraction {
    pub chapters: Vec<Chapter>,
    pub mode: ExtractionMode,
    pub stats: ExtractionStats,
}

/// Turns archive documents into numbered chapters
#[derive(Debug, Clone)]
pub struct ChapterExtractor {
    min_chars: usize,
}

impl Default for ChapterExtractor {
    fn default() -> Self {
        Self::new(MIN_CHAPTER_CHARS)
    }
}

impl ChapterExtractor {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    /// Extract chapters in spine order, falling back to a flat file scan
    ///
    /// `package` is the parsed package document with its directory, or `None`
    /// when no package document could be read.
    pub fn extract<A: ArchiveSource + ?Sized>(
        &self,
        archive: &A,
        package: Option<(&Package, &str)>,
    ) -> Extraction {
        if let Some((package, dir)) = package {
            let extraction = self.from_spine(archive, package, dir);
            if !extraction.chapters.is_empty() {
                return extraction;
            }
            debug!(
                "Spine produced no chapters ({:?}), scanning HTML entries",
                extraction.stats
            );
        }

        self.from_flat_files(archive)
    }

    /// Walk the spine; titles come from headings where available
    pub fn from_spine<A: ArchiveSource + ?Sized>(
        &self,
        archive: &A,
        package: &Package,
        package_dir: &str,
    ) -> Extraction {
        let mut chapters = Vec::new();
        let mut stats = ExtractionStats::default();

        for (index, item) in package.spine_items().enumerate() {
            stats.attempted += 1;
            let attempted = index + 1;

            if !item.is_html() {
                debug!("Skipping non-HTML spine item {} ({})", item.id, item.media_type);
                stats.non_html += 1;
                continue;
            }

            let path = resolve_href(package_dir, &item.href);
            let Some(document) = archive.entry_text(&path) else {
                debug!("Spine item {} missing at {}", item.id, path);
                stats.missing += 1;
                continue;
            };

            let content = extract_body(document);
            if !self.accepts(&content) {
                stats.too_short += 1;
                continue;
            }

            chapters.push(Chapter {
                number: chapters.len() as u32 + 1,
                title: derive_title(document, attempted),
                content,
                images: Vec::new(),
                source_path: path,
            });
        }

        Extraction {
            chapters,
            mode: ExtractionMode::Spine,
            stats,
        }
    }

    /// Every `.html`/`.xhtml`/`.htm` entry, sorted by path, titled by number
    pub fn from_flat_files<A: ArchiveSource + ?Sized>(&self, archive: &A) -> Extraction {
        let mut paths: Vec<&str> = archive
            .entry_names()
            .into_iter()
            .filter(|name| is_html_path(name))
            .collect();
        paths.sort_unstable();

        let mut chapters = Vec::new();
        let mut stats = ExtractionStats::default();

        for path in paths {
            stats.attempted += 1;
            let Some(document) = archive.entry_text(path) else {
                stats.missing += 1;
                continue;
            };

            let content = extract_body(document);
            if !self.accepts(&content) {
                stats.too_short += 1;
                continue;
            }

            let number = chapters.len() as u32 + 1;
            chapters.push(Chapter {
                number,
                title: format!("Chapter {}", number),
                content,
                images: Vec::new(),
                source_path: path.to_string(),
            });
        }

        Extraction {
            chapters,
            mode: ExtractionMode::FlatFileFallback,
            stats,
        }
    }

    fn accepts(&self, content: &str) -> bool {
        content.trim().chars().count() > self.min_chars
    }
}

fn is_html_path(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")
}

/// Chapter title: first `<h1>`, else `<h2>`, else `<title>`, else `Chapter {attempted}`
pub fn derive_title(document: &str, attempted: usize) -> String {
    [&*H1, &*H2, &*TITLE]
        .into_iter()
        .find_map(|pattern| pattern.text(document))
        .unwrap_or_else(|| format!("Chapter {}", attempted))
}

/// Body markup of a content document with wrapper noise removed
pub fn extract_body(document: &str) -> String {
    let cleaned = RE_XML_DECL.replace_all(document, "");
    let cleaned = RE_DOCTYPE.replace_all(&cleaned, "");

    let body = match RE_BODY.captures(&cleaned).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().to_string(),
        None => cleaned.into_owned(),
    };

    let body = RE_HTML_TAG.replace_all(&body, "");
    let body = RE_HEAD.replace_all(&body, "");
    let body = RE_META.replace_all(&body, "");
    let body = RE_LINK.replace_all(&body, "");
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::EpubArchive;
    use crate::package::PackageLocation;
    use crate::test_support::{EpubFixture, chapter_xhtml, filler, opf};
    use proptest::prelude::*;

    const XHTML: &str = "application/xhtml+xml";

    fn extract(bytes: &[u8]) -> Extraction {
        let archive = EpubArchive::from_bytes(bytes).unwrap();
        let location = PackageLocation {
            path: "OEBPS/content.opf".into(),
            dir: "OEBPS/".into(),
            from_container: true,
        };
        let package = archive.entry_text(&location.path).map(Package::parse);
        ChapterExtractor::default().extract(
            &archive,
            package.as_ref().map(|p| (p, location.dir.as_str())),
        )
    }

    #[test]
    fn test_prologue_scenario() {
        let ch1 = format!(
            "<h1>Prologue</h1><body><p>{}</p></body>",
            filler(400)
        );
        let bytes = EpubFixture::new()
            .package(&opf(
                &[("c1", "ch1.xhtml", XHTML), ("c2", "ch2.xhtml", XHTML)],
                &["c1", "c2"],
                "",
            ))
            .file("OEBPS/ch1.xhtml", ch1)
            .file("OEBPS/ch2.xhtml", "<p>hi</p>")
            .build();

        let extraction = extract(&bytes);
        assert_eq!(extraction.mode, ExtractionMode::Spine);
        assert_eq!(extraction.chapters.len(), 1);
        assert_eq!(extraction.chapters[0].number, 1);
        assert_eq!(extraction.chapters[0].title, "Prologue");
        assert_eq!(extraction.stats.too_short, 1);
    }

    #[test]
    fn test_short_item_compacts_numbering() {
        let long = chapter_xhtml(None, &format!("<p>{}</p>", filler(150)));
        let bytes = EpubFixture::new()
            .package(&opf(
                &[
                    ("a", "a.xhtml", XHTML),
                    ("b", "b.xhtml", XHTML),
                    ("c", "c.xhtml", XHTML),
                ],
                &["a", "b", "c"],
                "",
            ))
            .file("OEBPS/a.xhtml", &long)
            .file("OEBPS/b.xhtml", chapter_xhtml(Some("Interlude"), "<p>short</p>"))
            .file("OEBPS/c.xhtml", &long)
            .build();

        let extraction = extract(&bytes);
        let numbers: Vec<u32> = extraction.chapters.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        let sources: Vec<&str> = extraction
            .chapters
            .iter()
            .map(|c| c.source_path.as_str())
            .collect();
        assert_eq!(sources, vec!["OEBPS/a.xhtml", "OEBPS/c.xhtml"]);
    }

    #[test]
    fn test_synthesized_title_uses_attempted_index() {
        let untitled = format!("<html><body><p>{}</p></body></html>", filler(200));
        let bytes = EpubFixture::new()
            .package(&opf(
                &[("a", "a.xhtml", XHTML), ("b", "b.xhtml", XHTML)],
                &["a", "b"],
                "",
            ))
            .file("OEBPS/a.xhtml", "<p>too short</p>")
            .file("OEBPS/b.xhtml", untitled)
            .build();

        let extraction = extract(&bytes);
        assert_eq!(extraction.chapters.len(), 1);
        assert_eq!(extraction.chapters[0].number, 1);
        assert_eq!(extraction.chapters[0].title, "Chapter 2");
    }

    #[test]
    fn test_repeated_spine_id_yields_two_chapters() {
        let body = chapter_xhtml(Some("Refrain"), &format!("<p>{}</p>", filler(200)));
        let bytes = EpubFixture::new()
            .package(&opf(&[("a", "a.xhtml", XHTML)], &["a", "a"], ""))
            .file("OEBPS/a.xhtml", body)
            .build();

        let extraction = extract(&bytes);
        assert_eq!(extraction.stats.attempted, 2);
        let numbers: Vec<u32> = extraction.chapters.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(
            extraction
                .chapters
                .iter()
                .all(|c| c.source_path == "OEBPS/a.xhtml" && c.title == "Refrain")
        );
    }

    #[test]
    fn test_missing_and_non_html_spine_items_skipped() {
        let body = chapter_xhtml(Some("One"), &format!("<p>{}</p>", filler(200)));
        let bytes = EpubFixture::new()
            .package(&opf(
                &[
                    ("art", "images/art.png", "image/png"),
                    ("gone", "gone.xhtml", XHTML),
                    ("one", "one.xhtml", XHTML),
                ],
                &["art", "gone", "one"],
                "",
            ))
            .file("OEBPS/images/art.png", [0x89u8, 0x50, 0x4e, 0x47])
            .file("OEBPS/one.xhtml", body)
            .build();

        let extraction = extract(&bytes);
        assert_eq!(extraction.chapters.len(), 1);
        assert_eq!(extraction.chapters[0].title, "One");
        assert_eq!(extraction.stats.non_html, 1);
        assert_eq!(extraction.stats.missing, 1);
        assert_eq!(extraction.stats.attempted, 3);
    }

    #[test]
    fn test_flat_file_fallback_sorted_with_numbered_titles() {
        let doc = |h: &str| chapter_xhtml(Some(h), &format!("<p>{}</p>", filler(150)));
        let bytes = EpubFixture::new()
            .package(&opf(&[], &[], ""))
            .file("OEBPS/text/b.xhtml", doc("Second"))
            .file("OEBPS/text/a.html", doc("First"))
            .file("OEBPS/text/nav.xhtml", "<nav>toc</nav>")
            .file("OEBPS/style.css", "p { margin: 0 }")
            .build();

        let extraction = extract(&bytes);
        assert_eq!(extraction.mode, ExtractionMode::FlatFileFallback);
        let chapters: Vec<(u32, &str, &str)> = extraction
            .chapters
            .iter()
            .map(|c| (c.number, c.title.as_str(), c.source_path.as_str()))
            .collect();
        assert_eq!(
            chapters,
            vec![
                (1, "Chapter 1", "OEBPS/text/a.html"),
                (2, "Chapter 2", "OEBPS/text/b.xhtml"),
            ]
        );
    }

    #[test]
    fn test_fallback_without_package_document() {
        let bytes = EpubFixture::without_container()
            .file("chapter.xhtml", chapter_xhtml(None, &filler(300)))
            .build();

        let extraction = extract(&bytes);
        assert_eq!(extraction.mode, ExtractionMode::FlatFileFallback);
        assert_eq!(extraction.chapters.len(), 1);
    }

    #[test]
    fn test_derive_title_priority() {
        assert_eq!(
            derive_title("<title>T</title><h2>Two</h2><h1>One</h1>", 4),
            "One"
        );
        assert_eq!(derive_title("<title>T</title><h2>Two</h2>", 4), "Two");
        assert_eq!(derive_title("<title> T </title>", 4), "T");
        assert_eq!(derive_title("<title>  </title><p>x</p>", 4), "Chapter 4");
    }

    #[test]
    fn test_derive_title_strips_nested_tags() {
        let doc = r#"<h1 class="ch"><span class="num">3.</span> <em>The Bridge</em></h1>"#;
        assert_eq!(derive_title(doc, 1), "3. The Bridge");
    }

    #[test]
    fn test_extract_body_strips_wrapper_noise() {
        let doc = chapter_xhtml(Some("Head"), "<p>Body text</p>");
        assert_eq!(extract_body(&doc), "<h1>Head</h1><p>Body text</p>");
    }

    #[test]
    fn test_extract_body_without_body_tag() {
        let doc = r#"<?xml version="1.0"?><html><head><title>x</title></head><div>Loose <meta charset="utf-8"/>content</div></html>"#;
        assert_eq!(extract_body(doc), "<div>Loose content</div>");
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let extractor = ChapterExtractor::default();
        assert!(!extractor.accepts(&"x".repeat(100)));
        assert!(extractor.accepts(&"x".repeat(101)));
        assert!(!extractor.accepts(&format!("  {}  ", "x".repeat(100))));
    }

    proptest! {
        #[test]
        fn prop_spine_chapters_numbered_densely(lengths in proptest::collection::vec(0usize..300, 1..12)) {
            let mut fixture = EpubFixture::new();
            let mut manifest = Vec::new();
            let ids: Vec<String> = (0..lengths.len()).map(|i| format!("c{}", i)).collect();
            let hrefs: Vec<String> = (0..lengths.len()).map(|i| format!("ch{:02}.xhtml", i)).collect();

            for (i, len) in lengths.iter().enumerate() {
                fixture = fixture.file(
                    &format!("OEBPS/{}", hrefs[i]),
                    format!("<html><body><p>{}</p></body></html>", filler(*len)),
                );
            }
            for i in 0..lengths.len() {
                manifest.push((ids[i].as_str(), hrefs[i].as_str(), XHTML));
            }
            let spine: Vec<&str> = ids.iter().map(String::as_str).collect();
            let bytes = fixture.package(&opf(&manifest, &spine, "")).build();

            let extraction = extract(&bytes);
            // "<p>" + "</p>" contributes 7 characters to the body
            let expected: Vec<String> = lengths
                .iter()
                .enumerate()
                .filter(|(_, len)| **len + 7 > MIN_CHAPTER_CHARS)
                .map(|(i, _)| format!("OEBPS/{}", hrefs[i]))
                .collect();

            if expected.is_empty() {
                prop_assert_eq!(extraction.mode, ExtractionMode::FlatFileFallback);
            } else {
                prop_assert_eq!(extraction.mode, ExtractionMode::Spine);
                let sources: Vec<String> = extraction.chapters.iter().map(|c| c.source_path.clone()).collect();
                prop_assert_eq!(sources, expected);
            }
            for (i, chapter) in extraction.chapters.iter().enumerate() {
                prop_assert_eq!(chapter.number as usize, i + 1);
            }
        }
    }
}
