#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::panic;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::RagError;
use crate::embeddings::chunking::{sanitize_bytes, sanitize_text};

/// Page break marker emitted by `pdftotext` and friends
const PAGE_BREAK: char = '\x0c';

const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown"];
const PDF_EXTENSION: &str = "pdf";

/// One block of a document's text, tagged with its page when paginated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page: Option<u32>,
    pub text: String,
}

/// A selectable document in the documents directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Supplies document listings and extracted text
pub trait DocumentSource: Send + Sync {
    /// Documents directly inside `dir`, sorted by name. A missing directory is empty.
    fn list_documents(&self, dir: &Path) -> crate::Result<Vec<DocumentInfo>>;

    /// Extract the text of a document as page-tagged blocks
    fn load_text(&self, path: &Path) -> crate::Result<Vec<PageText>>;
}

/// Reads plain text and markdown files, including the output of `pdftotext`,
/// and extracts PDFs page by page
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDocumentSource;

impl TextDocumentSource {
    #[inline]
    pub fn new() -> Self {
        Self
    }

    /// Whether the file extension is one this source can read
    #[inline]
    pub fn supports(path: &Path) -> bool {
        is_pdf(path)
            || extension(path).is_some_and(|ext| {
                TEXT_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

fn is_pdf(path: &Path) -> bool {
    extension(path).is_some_and(|ext| ext.eq_ignore_ascii_case(PDF_EXTENSION))
}

impl DocumentSource for TextDocumentSource {
    fn list_documents(&self, dir: &Path) -> crate::Result<Vec<DocumentInfo>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Documents directory {} does not exist", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !Self::supports(&path) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            documents.push(DocumentInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                size: metadata.len(),
                modified,
            });
        }

        documents.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Found {} documents in {}", documents.len(), dir.display());
        Ok(documents)
    }

    fn load_text(&self, path: &Path) -> crate::Result<Vec<PageText>> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => RagError::NotFound(path.to_path_buf()),
            _ => RagError::Io(e),
        })?;

        if is_pdf(path) {
            return Ok(pdf_pages(&bytes, path));
        }

        let text = sanitize_bytes(&bytes);
        Ok(split_pages(&text))
    }
}

/// Extract one block per PDF page, numbered from 0. A PDF that cannot be
/// parsed yields no pages.
#[inline]
pub fn pdf_pages(bytes: &[u8], path: &Path) -> Vec<PageText> {
    let pages = match panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes)) {
        Ok(Ok(pages)) => pages,
        Ok(Err(e)) => {
            warn!("Could not extract text from {}: {}", path.display(), e);
            return Vec::new();
        }
        Err(_) => {
            warn!("PDF parser failed on {}", path.display());
            return Vec::new();
        }
    };

    debug!("Extracted {} page(s) from {}", pages.len(), path.display());
    pages
        .iter()
        .zip(0u32..)
        .map(|(text, page)| PageText {
            page: Some(page),
            text: sanitize_text(text),
        })
        .collect()
}

/// Split text on form feeds. Unpaginated text becomes a single untagged block.
#[inline]
pub fn split_pages(text: &str) -> Vec<PageText> {
    if !text.contains(PAGE_BREAK) {
        return vec![PageText {
            page: None,
            text: text.to_string(),
        }];
    }

    text.split(PAGE_BREAK)
        .zip(0u32..)
        .map(|(page_text, page)| PageText {
            page: Some(page),
            text: page_text.to_string(),
        })
        .collect()
}
