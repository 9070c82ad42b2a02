//! Targeted pattern extraction over XML/HTML text.
//!
//! EPUBs in the wild are frequently not well-formed, so nothing here
//! validates structure: a tag that cannot be found is simply absent.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Common named entities and their replacements. `&amp;` is decoded last.
const ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&#39;", "'"),
    ("&mdash;", "\u{2014}"),
    ("&ndash;", "\u{2013}"),
    ("&hellip;", "\u{2026}"),
    ("&rsquo;", "\u{2019}"),
    ("&lsquo;", "\u{2018}"),
    ("&rdquo;", "\u{201d}"),
    ("&ldquo;", "\u{201c}"),
    ("&amp;", "&"),
];

/// Compiled patterns for one element name
pub struct TagPattern {
    block: Regex,
    open: Regex,
}

impl TagPattern {
    /// Patterns for `<tag ...>inner</tag>` blocks and `<tag ...>` opening tags
    ///
    /// Matching is case-insensitive and tolerates any attributes. The name is
    /// matched literally (prefixes like `dc:` included).
    pub fn new(tag: &str) -> Self {
        let tag = regex::escape(tag);
        Self {
            block: Regex::new(&format!(r"(?is)<{tag}(?:\s[^>]*)?>(.*?)</{tag}\s*>"))
                .expect("escaped tag name forms a valid pattern"),
            open: Regex::new(&format!(r"(?i)<{tag}(?:\s[^>]*)?>"))
                .expect("escaped tag name forms a valid pattern"),
        }
    }

    /// Inner content of the first block
    pub fn block<'a>(&self, xml: &'a str) -> Option<&'a str> {
        self.block
            .captures(xml)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    /// Every opening (or self-closing) tag, in document order
    pub fn open_tags<'a>(&self, xml: &'a str) -> impl Iterator<Item = &'a str> {
        self.open.find_iter(xml).map(|m| m.as_str())
    }

    /// Plain text of the first block, if it has any
    pub fn text(&self, xml: &str) -> Option<String> {
        self.block(xml)
            .map(inner_text)
            .filter(|text| !text.is_empty())
    }
}

/// Value of attribute `name` inside a single tag
///
/// Accepts either quote style and whitespace around `=`. The attribute must be
/// preceded by whitespace, so `id` never matches inside `idref` or `data-id`.
pub fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let pattern = format!(
        r#"(?i)\s{}\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(tag)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str())
}

/// Remove every tag, keeping text
pub fn strip_tags(html: &str) -> String {
    RE_TAG.replace_all(html, "").into_owned()
}

/// Decode the handful of entities that commonly appear in titles
pub fn decode_entities(text: &str) -> String {
    ENTITIES
        .iter()
        .fold(text.to_string(), |acc, (entity, replacement)| {
            acc.replace(entity, replacement)
        })
}

/// Collapse runs of whitespace into single spaces and trim
pub fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Readable single-line text of a markup fragment
pub fn inner_text(html: &str) -> String {
    collapse_whitespace(&decode_entities(&strip_tags(html)))
}
