
use tracing::debug;

use crate::embeddings::{DocumentChunk, sanitize_text};
use crate::retrieval::RetrievedChunk;

/// Placed between consecutive chunks, and charged against the budget
pub const CHUNK_SEPARATOR: &str = "\n\n";

/// Contexts shorter than this (after trimming) are not worth answering from
pub const MIN_USEFUL_CONTEXT_CHARS: usize = 50;

/// Retrieved evidence packed into one bounded string
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    /// Chunks that contributed at least one character, in order
    pub used_chunks: Vec<RetrievedChunk>,
}

impl AssembledContext {
    /// Whether the context carries enough text to ground an answer
    #[inline]
    pub fn is_usable(&self) -> bool {
        self.text.trim().chars().count() >= MIN_USEFUL_CONTEXT_CHARS
    }

    #[inline]
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    #[inline]
    pub fn chunks(&self) -> impl Iterator<Item = &DocumentChunk> {
        self.used_chunks.iter().map(|r| &r.chunk)
    }
}

/// Concatenate ranked chunks into at most `max_chars` characters.
///
/// Chunks are joined by [`CHUNK_SEPARATOR`]; the last chunk that fits only in
/// part is cut at a character boundary and nothing after it is used.
#[inline]
pub fn assemble(ranked: &[RetrievedChunk], max_chars: usize) -> AssembledContext {
    let mut text = String::new();
    let mut used_chunks = Vec::new();
    let mut remaining = max_chars;
    let separator_len = CHUNK_SEPARATOR.chars().count();

    for retrieved in ranked {
        if remaining == 0 {
            break;
        }

        let chunk_text = sanitize_text(&retrieved.chunk.text);
        if chunk_text.is_empty() {
            continue;
        }

        if !text.is_empty() {
            // Room for the separator plus at least one character
            if remaining <= separator_len {
                break;
            }
            text.push_str(CHUNK_SEPARATOR);
            remaining -= separator_len;
        }

        let chunk_len = chunk_text.chars().count();
        if chunk_len <= remaining {
            text.push_str(&chunk_text);
            remaining -= chunk_len;
            used_chunks.push(retrieved.clone());
        } else {
            text.extend(chunk_text.chars().take(remaining));
            remaining = 0;
            used_chunks.push(retrieved.clone());
        }
    }

    debug!(
        "Assembled {} chars of context from {} of {} chunk(s)",
        max_chars - remaining,
        used_chunks.len(),
        ranked.len()
    );

    AssembledContext { text, used_chunks }
}
