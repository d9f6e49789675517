// Per-document vector indexes
// Identity derivation, the in-memory index, its on-disk format and the cache manager

pub mod cache;
pub mod storage;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::RagError;
use crate::embeddings::DocumentChunk;

pub use cache::IndexCacheManager;
pub use storage::IndexInfo;

/// Hex characters of the path hash kept in an identity
const IDENTITY_HASH_LEN: usize = 8;

/// Deterministic key of a document's index, also its directory name.
///
/// `{sanitized file stem}_{first 8 hex chars of sha256(canonical path)}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexIdentity(String);

impl IndexIdentity {
    /// Derive the identity of a canonical (absolute, normalized) document path
    #[inline]
    pub fn from_path(canonical_path: &Path) -> Self {
        let stem = canonical_path
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        let base: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        let digest = format!(
            "{:x}",
            Sha256::digest(canonical_path.as_os_str().as_encoded_bytes())
        );

        Self(format!("{}_{}", base, &digest[..IDENTITY_HASH_LEN]))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexIdentity {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chunk embeddings of one document plus the chunks themselves.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    identity: IndexIdentity,
    embedding_model: String,
    dimension: usize,
    source: PathBuf,
    created_at: DateTime<Utc>,
    chunks: Vec<DocumentChunk>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Build an index from freshly embedded chunks.
    ///
    /// Fails when the vectors don't pair up with the chunks or disagree on dimension.
    #[inline]
    pub fn new(
        identity: IndexIdentity,
        embedding_model: impl Into<String>,
        source: PathBuf,
        chunks: Vec<DocumentChunk>,
        vectors: Vec<Vec<f32>>,
    ) -> crate::Result<Self> {
        let dimension = check_shape(&chunks, &vectors).map_err(RagError::EmbeddingUnavailable)?;

        Ok(Self {
            identity,
            embedding_model: embedding_model.into(),
            dimension,
            source,
            created_at: Utc::now(),
            chunks,
            vectors,
        })
    }

    #[inline]
    pub fn identity(&self) -> &IndexIdentity {
        &self.identity
    }

    /// Model that produced the vectors
    #[inline]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Components per vector, 0 for an empty index
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[inline]
    pub fn chunks(&self) -> &[DocumentChunk] {
        &self.chunks
    }

    #[inline]
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// An index of zero chunks. Valid, but retrieval over it finds nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Vector dimension when every chunk has one vector and all vectors agree
fn check_shape(chunks: &[DocumentChunk], vectors: &[Vec<f32>]) -> Result<usize, String> {
    if chunks.len() != vectors.len() {
        return Err(format!(
            "{} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        ));
    }

    let dimension = vectors.first().map_or(0, Vec::len);
    if let Some((position, vector)) = vectors
        .iter()
        .enumerate()
        .find(|(_, v)| v.len() != dimension)
    {
        return Err(format!(
            "vector {} has {} dimensions, expected {}",
            position,
            vector.len(),
            dimension
        ));
    }

    if !vectors.is_empty() && dimension == 0 {
        return Err("vectors have no components".to_string());
    }

    Ok(dimension)
}
