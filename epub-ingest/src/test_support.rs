//! Fixture builders for EPUB tests.

use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

pub const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// Build a ZIP blob; names ending in `/` become directory entries
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));

    for (name, content) in entries {
        if name.ends_with('/') {
            writer
                .add_directory(*name, SimpleFileOptions::default())
                .unwrap();
        } else {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
    }

    writer.finish().unwrap().into_inner()
}

/// Readable filler text of exactly `len` characters
pub fn filler(len: usize) -> String {
    "The lamplighter walked the long road home. "
        .chars()
        .cycle()
        .take(len)
        .collect()
}

/// Package document with the given manifest `(id, href, media-type)` and spine
pub fn opf(manifest: &[(&str, &str, &str)], spine: &[&str], extra_metadata: &str) -> String {
    let items: String = manifest
        .iter()
        .map(|(id, href, media_type)| {
            format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
                id, href, media_type
            )
        })
        .collect();
    let itemrefs: String = spine
        .iter()
        .map(|id| format!("    <itemref idref=\"{}\"/>\n", id))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>The Lamplighter</dc:title>
    <dc:creator>A. Writer</dc:creator>
    <dc:description>A quiet story.</dc:description>
{extra_metadata}
  </metadata>
  <manifest>
{items}  </manifest>
  <spine toc="ncx">
{itemrefs}  </spine>
</package>"#
    )
}

/// XHTML chapter document with an optional `<h1>` and the given body markup
pub fn chapter_xhtml(heading: Option<&str>, body: &str) -> String {
    let heading = heading
        .map(|h| format!("<h1>{}</h1>", h))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>Doc</title><meta charset="utf-8"/><link rel="stylesheet" href="style.css"/></head>
<body>{heading}{body}</body>
</html>"#
    )
}

/// Builder for a whole EPUB archive
pub struct EpubFixture {
    files: Vec<(String, Vec<u8>)>,
}

impl EpubFixture {
    /// Archive with a mimetype entry and a container pointing at `OEBPS/content.opf`
    pub fn new() -> Self {
        Self::without_container().file("META-INF/container.xml", CONTAINER_XML)
    }

    /// Archive with only a mimetype entry
    pub fn without_container() -> Self {
        Self {
            files: vec![("mimetype".to_string(), b"application/epub+zip".to_vec())],
        }
    }

    pub fn file(mut self, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.files.push((path.to_string(), content.as_ref().to_vec()));
        self
    }

    pub fn package(self, opf: &str) -> Self {
        self.file("OEBPS/content.opf", opf)
    }

    pub fn build(&self) -> Vec<u8> {
        let entries: Vec<(&str, &[u8])> = self
            .files
            .iter()
            .map(|(name, content)| (name.as_str(), content.as_slice()))
            .collect();
        build_zip(&entries)
    }
}
