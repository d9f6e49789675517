
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::documents::PageText;

/// Where a chunk came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Canonical path of the source document
    pub source: PathBuf,
    /// Page the chunk was cut from, when the source is paginated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Position of this chunk within the whole document
    pub chunk_index: usize,
}

/// A passage of a document, the unit of embedding and retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Configuration for document chunking. Sizes are in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 250,
            chunk_overlap: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Sentence,
    Word,
}

const BOUNDARY_PREFERENCE: [Boundary; 3] =
    [Boundary::Paragraph, Boundary::Sentence, Boundary::Word];

/// Chunk every page of a document. Pages are split independently and chunk
/// indexes run across the whole document.
#[inline]
pub fn chunk_document(
    source: &Path,
    pages: &[PageText],
    config: &ChunkingConfig,
) -> Vec<DocumentChunk> {
    let mut chunks = Vec::new();

    for page in pages {
        for text in chunk_text(&page.text, config) {
            let text = sanitize_text(&text);
            if text.trim().is_empty() {
                continue;
            }

            chunks.push(DocumentChunk {
                text,
                metadata: ChunkMetadata {
                    source: source.to_path_buf(),
                    page: page.page,
                    chunk_index: chunks.len(),
                },
            });
        }
    }

    debug!(
        "Chunked {} page(s) of {} into {} chunks (avg {} chars)",
        pages.len(),
        source.display(),
        chunks.len(),
        chunks
            .iter()
            .map(|c| c.text.chars().count())
            .sum::<usize>()
            / chunks.len().max(1)
    );

    chunks
}

/// Split text into overlapping chunks of at most `chunk_size` characters.
///
/// Each cut lands on the farthest paragraph boundary inside the allowed range,
/// else the farthest sentence boundary, else the farthest word boundary, and
/// only then mid-word. The next chunk starts on a word at or before
/// `chunk_overlap` characters from the end of the previous one.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = config.chunk_size.max(1);
    let overlap = config.chunk_overlap.min(size / 2);
    let min_advance = (overlap + 1).max(size / 2);

    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        start = skip_whitespace(&chars, start);
        if start >= chars.len() {
            break;
        }

        if chars.len() - start <= size {
            let end = trim_end(&chars, start, chars.len());
            chunks.push(chars[start..end].iter().collect());
            break;
        }

        let window_end = start + size;
        let cut = find_cut(&chars, start + min_advance, window_end);
        let end = trim_end(&chars, start, cut);
        chunks.push(chars[start..end].iter().collect());

        start = if end - start > overlap {
            overlap_start(&chars, start, end - overlap)
        } else {
            // Mostly whitespace, nothing worth repeating
            skip_whitespace(&chars, cut)
        };
    }

    chunks
}

fn find_cut(chars: &[char], min_cut: usize, window_end: usize) -> usize {
    BOUNDARY_PREFERENCE
        .iter()
        .find_map(|&boundary| {
            (min_cut..=window_end)
                .rev()
                .find(|&pos| is_boundary(chars, pos, boundary))
        })
        .unwrap_or(window_end)
}

fn is_boundary(chars: &[char], pos: usize, boundary: Boundary) -> bool {
    if pos == 0 || pos > chars.len() {
        return false;
    }

    let prev = chars[pos - 1];
    match boundary {
        Boundary::Paragraph => {
            prev == '\n'
                && chars[..pos - 1]
                    .iter()
                    .rev()
                    .find(|c| !matches!(c, ' ' | '\t' | '\r'))
                    == Some(&'\n')
        }
        Boundary::Sentence => {
            prev == '\n'
                || (prev.is_whitespace()
                    && pos >= 2
                    && matches!(chars[pos - 2], '.' | '!' | '?' | '。' | '！' | '？'))
        }
        Boundary::Word => prev.is_whitespace(),
    }
}

/// Latest word start in `(start, target]`, else the latest non-whitespace
/// position there, so the following whitespace skip never moves past `target`
fn overlap_start(chars: &[char], start: usize, target: usize) -> usize {
    let range = start + 1..=target;
    range
        .clone()
        .rev()
        .find(|&pos| chars[pos - 1].is_whitespace() && !chars[pos].is_whitespace())
        .or_else(|| range.rev().find(|&pos| !chars[pos].is_whitespace()))
        .unwrap_or(target)
}

fn skip_whitespace(chars: &[char], from: usize) -> usize {
    chars[from.min(chars.len())..]
        .iter()
        .position(|c| !c.is_whitespace())
        .map_or(chars.len(), |offset| from + offset)
}

fn trim_end(chars: &[char], start: usize, end: usize) -> usize {
    chars[start..end]
        .iter()
        .rposition(|c| !c.is_whitespace())
        .map_or(start, |last| start + last + 1)
}

/// Strip characters that survive decoding but corrupt downstream encoding:
/// replacement characters left by lossy decoders and NUL bytes.
#[inline]
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER && c != '\0')
        .collect()
}

/// Decode bytes as UTF-8, dropping every undecodable sequence
#[inline]
pub fn sanitize_bytes(bytes: &[u8]) -> String {
    let mut decoded = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        decoded.push_str(chunk.valid());
    }
    sanitize_text(&decoded)
}
