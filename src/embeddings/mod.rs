// Embeddings module
// Chunking of document text and the embedding backend seam

pub mod chunking;

pub use chunking::{
    ChunkMetadata, ChunkingConfig, DocumentChunk, chunk_document, chunk_text, sanitize_bytes,
    sanitize_text,
};

/// Converts text into fixed-dimension vectors.
///
/// Implementations block; async callers go through `spawn_blocking`.
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors. Stored with every index.
    fn model_id(&self) -> &str;

    /// Embed each text, returning one vector per input in the same order
    fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>;
}
