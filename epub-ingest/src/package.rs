// Container and package document (OPF) parsing

use log::debug;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

use crate::archive::ArchiveSource;
use crate::markup::{TagPattern, attr};

pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const DEFAULT_PACKAGE_PATH: &str = "OEBPS/content.opf";

pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_AUTHOR: &str = "Unknown";

static ROOTFILE: Lazy<TagPattern> = Lazy::new(|| TagPattern::new("rootfile"));
static METADATA_BLOCKS: Lazy<Vec<TagPattern>> = Lazy::new(|| {
    ["metadata", "opf:metadata", "dc:metadata"]
        .into_iter()
        .map(TagPattern::new)
        .collect()
});
static MANIFEST: Lazy<TagPattern> = Lazy::new(|| TagPattern::new("manifest"));
static SPINE: Lazy<TagPattern> = Lazy::new(|| TagPattern::new("spine"));
static ITEM: Lazy<TagPattern> = Lazy::new(|| TagPattern::new("item"));
static ITEMREF: Lazy<TagPattern> = Lazy::new(|| TagPattern::new("itemref"));
static META: Lazy<TagPattern> = Lazy::new(|| TagPattern::new("meta"));

/// Prefixed name first, then the unprefixed form
static TITLE_FIELDS: Lazy<[TagPattern; 2]> =
    Lazy::new(|| [TagPattern::new("dc:title"), TagPattern::new("title")]);
static CREATOR_FIELDS: Lazy<[TagPattern; 2]> =
    Lazy::new(|| [TagPattern::new("dc:creator"), TagPattern::new("creator")]);
static DESCRIPTION_FIELDS: Lazy<[TagPattern; 2]> = Lazy::new(|| {
    [
        TagPattern::new("dc:description"),
        TagPattern::new("description"),
    ]
});

/// Where the package document lives inside the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLocation {
    /// Archive path of the package document
    pub path: String,
    /// Containing directory, empty or ending with `/`
    pub dir: String,
    /// Whether the path came from container.xml rather than the fallback
    pub from_container: bool,
}

impl PackageLocation {
    fn new(path: &str, from_container: bool) -> Self {
        Self {
            path: path.to_string(),
            dir: parent_dir(path).to_string(),
            from_container,
        }
    }
}

/// Locate the package document via `META-INF/container.xml`
///
/// Falls back to `fallback` when the container entry is missing, unreadable,
/// or declares no `full-path`.
pub fn resolve_container<A: ArchiveSource + ?Sized>(
    archive: &A,
    fallback: &str,
) -> PackageLocation {
    let declared = archive.entry_text(CONTAINER_PATH).and_then(|xml| {
        ROOTFILE
            .open_tags(xml)
            .find_map(|tag| attr(tag, "full-path"))
            .or_else(|| attr(xml, "full-path"))
            .map(|path| path.trim().trim_start_matches('/'))
            .filter(|path| !path.is_empty())
    });

    match declared {
        Some(path) => {
            debug!("Package document declared at {}", path);
            PackageLocation::new(path, true)
        }
        None => {
            debug!("No usable container.xml, assuming {}", fallback);
            PackageLocation::new(fallback, false)
        }
    }
}

/// Book-level metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageMetadata {
    pub title: String,
    pub author: String,
    pub description: String,
}

impl Default for PackageMetadata {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            author: DEFAULT_AUTHOR.to_string(),
            description: String::new(),
        }
    }
}

impl PackageMetadata {
    /// Extract fields from the package's metadata block, defaulting each independently
    pub fn extract(opf: &str) -> Self {
        let block = METADATA_BLOCKS
            .iter()
            .find_map(|pattern| pattern.block(opf))
            .unwrap_or(opf);

        let defaults = Self::default();
        Self {
            title: first_field(block, TITLE_FIELDS.as_slice()).unwrap_or(defaults.title),
            author: first_field(block, CREATOR_FIELDS.as_slice()).unwrap_or(defaults.author),
            description: first_field(block, DESCRIPTION_FIELDS.as_slice())
                .unwrap_or(defaults.description),
        }
    }
}

fn first_field(block: &str, patterns: &[TagPattern]) -> Option<String> {
    patterns
        .iter()
        .find_map(|pattern| pattern.block(block))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// One resource declared in the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Path relative to the package document's directory
    pub href: String,
    pub media_type: String,
}

impl ManifestItem {
    /// Whether this item can hold chapter markup
    ///
    /// Items without a declared media type are given the benefit of the doubt.
    pub fn is_html(&self) -> bool {
        self.media_type.is_empty() || self.media_type.to_ascii_lowercase().contains("html")
    }
}

/// Cover image candidate from `<meta name="cover">`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverReference {
    pub manifest_id: String,
    pub resolved_path: String,
    pub media_type: String,
}

/// Parsed package document
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub metadata: PackageMetadata,
    pub manifest: HashMap<String, ManifestItem>,
    /// Reading order; every id is present in `manifest`
    pub spine: Vec<String>,
    pub cover_id: Option<String>,
}

impl Package {
    /// Parse package document text; never fails, missing pieces come back empty
    pub fn parse(opf: &str) -> Self {
        let metadata = PackageMetadata::extract(opf);
        let manifest = parse_manifest(opf);
        let spine = parse_spine(opf, &manifest);
        let cover_id = parse_cover_id(opf);

        debug!(
            "Package: {} manifest items, {} spine entries, cover {:?}",
            manifest.len(),
            spine.len(),
            cover_id
        );

        Self {
            metadata,
            manifest,
            spine,
            cover_id,
        }
    }

    /// Spine entries with their manifest items, in reading order
    pub fn spine_items(&self) -> impl Iterator<Item = &ManifestItem> {
        self.spine.iter().filter_map(|id| self.manifest.get(id))
    }

    /// The cover candidate, if the declared id names a manifest entry
    pub fn cover(&self, package_dir: &str) -> Option<CoverReference> {
        let id = self.cover_id.as_ref()?;
        let item = self.manifest.get(id)?;
        Some(CoverReference {
            manifest_id: id.clone(),
            resolved_path: resolve_href(package_dir, &item.href),
            media_type: item.media_type.clone(),
        })
    }

    /// Archive path → media type for every manifest entry
    pub fn media_types(&self, package_dir: &str) -> HashMap<String, String> {
        self.manifest
            .values()
            .filter(|item| !item.media_type.is_empty())
            .map(|item| (resolve_href(package_dir, &item.href), item.media_type.clone()))
            .collect()
    }
}

/// Collect `<item>` entries; later duplicates of an id replace earlier ones
fn parse_manifest(opf: &str) -> HashMap<String, ManifestItem> {
    let Some(block) = MANIFEST.block(opf) else {
        return HashMap::new();
    };

    let mut manifest = HashMap::new();
    for tag in ITEM.open_tags(block) {
        let (Some(id), Some(href)) = (attr(tag, "id"), attr(tag, "href")) else {
            continue;
        };
        if id.is_empty() || href.is_empty() {
            continue;
        }

        manifest.insert(
            id.to_string(),
            ManifestItem {
                id: id.to_string(),
                href: href.to_string(),
                media_type: attr(tag, "media-type").unwrap_or_default().to_string(),
            },
        );
    }
    manifest
}

/// Collect `<itemref>` ids in order, dropping ids the manifest does not declare
fn parse_spine(opf: &str, manifest: &HashMap<String, ManifestItem>) -> Vec<String> {
    let Some(block) = SPINE.block(opf) else {
        return Vec::new();
    };

    ITEMREF
        .open_tags(block)
        .filter_map(|tag| attr(tag, "idref"))
        .filter(|id| manifest.contains_key(*id))
        .map(str::to_string)
        .collect()
}

fn parse_cover_id(opf: &str) -> Option<String> {
    META.open_tags(opf)
        .find(|tag| attr(tag, "name").is_some_and(|name| name.eq_ignore_ascii_case("cover")))
        .and_then(|tag| attr(tag, "content"))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Directory part of an archive path, empty or ending with `/`
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "",
    }
}

/// Archive path of an href relative to `base_dir`, without any `#fragment`
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    format!("{}{}", base_dir, href)
}
