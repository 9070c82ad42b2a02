// EPUB container access: ZIP bytes to a name -> bytes map

use log::{debug, warn};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use thiserror::Error;

use crate::error::Result;

/// Why a text entry could not be read
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryTextError {
    #[error("entry not found: {0}")]
    Missing(String),

    #[error("entry is not valid UTF-8: {path}")]
    NotUtf8 { path: String },
}

/// Read-only access to the files inside an e-book container
pub trait ArchiveSource {
    /// Raw bytes of an entry
    fn entry(&self, path: &str) -> Option<&[u8]>;

    /// All file entry names, in lexicographic order
    fn entry_names(&self) -> Vec<&str>;

    /// Decode an entry as strict UTF-8, distinguishing missing from undecodable
    fn try_entry_text(&self, path: &str) -> std::result::Result<&str, EntryTextError> {
        let bytes = self
            .entry(path)
            .ok_or_else(|| EntryTextError::Missing(path.to_string()))?;
        let text = std::str::from_utf8(bytes).map_err(|_| EntryTextError::NotUtf8 {
            path: path.to_string(),
        })?;
        Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
    }

    /// Decode an entry as text; missing and undecodable both read as absent
    fn entry_text(&self, path: &str) -> Option<&str> {
        match self.try_entry_text(path) {
            Ok(text) => Some(text),
            Err(e @ EntryTextError::NotUtf8 { .. }) => {
                debug!("Treating {} as absent", e);
                None
            }
            Err(EntryTextError::Missing(_)) => None,
        }
    }
}

/// A fully decompressed EPUB archive
#[derive(Debug, Default)]
pub struct EpubArchive {
    entries: BTreeMap<String, Vec<u8>>,
}

impl EpubArchive {
    /// Decompress a ZIP blob
    ///
    /// Fails only when the central directory cannot be read. Individual
    /// entries that fail to decompress are skipped.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = BTreeMap::new();

        for i in 0..zip.len() {
            let mut file = match zip.by_index(i) {
                Ok(file) => file,
                Err(e) => {
                    warn!("Skipping unreadable archive entry #{}: {}", i, e);
                    continue;
                }
            };

            if file.is_dir() {
                continue;
            }

            let name = file.name().to_string();
            let mut content = Vec::new();
            if let Err(e) = file.read_to_end(&mut content) {
                warn!("Skipping corrupt archive entry {}: {}", name, e);
                continue;
            }
            entries.insert(name, content);
        }

        debug!("Archive opened with {} entries", entries.len());
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ArchiveSource for EpubArchive {
    fn entry(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    fn entry_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}
