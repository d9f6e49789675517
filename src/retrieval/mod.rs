
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::RagError;
use crate::embeddings::{DocumentChunk, Embedder};
use crate::index::VectorIndex;

/// Relevance weight in the MMR objective
pub const MMR_LAMBDA: f32 = 0.5;
/// Smallest candidate pool MMR selects from
pub const MMR_MIN_FETCH: usize = 10;
/// Candidate pool size as a multiple of `top_k`
pub const MMR_FETCH_MULTIPLIER: usize = 5;

pub const MAX_TOP_K: usize = 50;
pub const MAX_CONTEXT_CHARS: usize = 100_000;
pub const MAX_ANSWER_TOKENS: u32 = 8192;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Nearest neighbours by cosine similarity
    #[default]
    Similarity,
    /// Maximal marginal relevance
    #[serde(alias = "mmr")]
    Diversity,
}

impl fmt::Display for RetrievalMode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Similarity => write!(f, "similarity"),
            Self::Diversity => write!(f, "diversity"),
        }
    }
}

impl FromStr for RetrievalMode {
    type Err = SettingsError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "similarity" => Ok(Self::Similarity),
            "diversity" | "mmr" => Ok(Self::Diversity),
            other => Err(SettingsError::UnknownMode(other.to_string())),
        }
    }
}

/// Per-query retrieval and answering knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub mode: RetrievalMode,
    pub max_context_chars: usize,
    pub max_answer_tokens: u32,
    /// Return the supporting sources with each answer
    pub show_context: bool,
}

impl Default for RetrievalSettings {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 4,
            mode: RetrievalMode::Similarity,
            max_context_chars: 4000,
            max_answer_tokens: 256,
            show_context: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("top_k must be between 1 and {MAX_TOP_K}, got {0}")]
    TopK(usize),
    #[error("max_context_chars must be between 1 and {MAX_CONTEXT_CHARS}, got {0}")]
    MaxContextChars(usize),
    #[error("max_answer_tokens must be between 1 and {MAX_ANSWER_TOKENS}, got {0}")]
    MaxAnswerTokens(u32),
    #[error("unknown retrieval mode '{0}' (expected 'similarity' or 'diversity')")]
    UnknownMode(String),
}

impl From<SettingsError> for RagError {
    #[inline]
    fn from(error: SettingsError) -> Self {
        RagError::InvalidSettings(error.to_string())
    }
}

impl RetrievalSettings {
    #[inline]
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(SettingsError::TopK(self.top_k));
        }
        if !(1..=MAX_CONTEXT_CHARS).contains(&self.max_context_chars) {
            return Err(SettingsError::MaxContextChars(self.max_context_chars));
        }
        if !(1..=MAX_ANSWER_TOKENS).contains(&self.max_answer_tokens) {
            return Err(SettingsError::MaxAnswerTokens(self.max_answer_tokens));
        }
        Ok(())
    }
}

/// A chunk selected for a query, with its cosine similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Embeds queries and ranks an index's chunks against them
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Retrieve the most relevant chunks of `index` for `query`, best first
    #[inline]
    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        query: &str,
        settings: &RetrievalSettings,
    ) -> crate::Result<Vec<RetrievedChunk>> {
        if index.is_empty() {
            debug!("Index {} is empty, nothing to retrieve", index.identity());
            return Ok(Vec::new());
        }

        if self.embedder.model_id() != index.embedding_model() {
            return Err(RagError::EmbeddingModelMismatch {
                index_model: index.embedding_model().to_string(),
                configured_model: self.embedder.model_id().to_string(),
            });
        }

        let embedder = Arc::clone(&self.embedder);
        let texts = vec![query.to_string()];
        let mut vectors = tokio::task::spawn_blocking(move || embedder.embed(&texts))
            .await
            .map_err(|e| anyhow::anyhow!("Query embedding task failed: {}", e))??;

        let query_vector = vectors.pop().ok_or_else(|| {
            RagError::EmbeddingUnavailable("no embedding returned for the query".to_string())
        })?;

        if query_vector.len() != index.dimension() {
            return Err(RagError::EmbeddingUnavailable(format!(
                "query embedding has {} dimensions but the index expects {}",
                query_vector.len(),
                index.dimension()
            )));
        }

        let results = rank(index, &query_vector, settings.top_k, settings.mode);
        debug!(
            "Retrieved {} chunk(s) from {} using {} (top_k {})",
            results.len(),
            index.identity(),
            settings.mode,
            settings.top_k
        );
        Ok(results)
    }
}

/// Rank an index's chunks against a query vector
#[inline]
pub fn rank(
    index: &VectorIndex,
    query: &[f32],
    top_k: usize,
    mode: RetrievalMode,
) -> Vec<RetrievedChunk> {
    let picked = match mode {
        RetrievalMode::Similarity => similarity_search(index.vectors(), query, top_k),
        RetrievalMode::Diversity => {
            let fetch_k = MMR_MIN_FETCH.max(top_k.saturating_mul(MMR_FETCH_MULTIPLIER));
            let candidates = similarity_search(index.vectors(), query, fetch_k);
            mmr_select(index.vectors(), &candidates, top_k, MMR_LAMBDA)
        }
    };

    picked
        .into_iter()
        .map(|(position, score)| RetrievedChunk {
            chunk: index.chunks()[position].clone(),
            score,
        })
        .collect()
}

/// The `k` most similar vectors as `(position, score)`, best first. Ties keep
/// insertion order.
#[inline]
pub fn similarity_search(vectors: &[Vec<f32>], query: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(position, vector)| (position, cosine_similarity(query, vector)))
        .collect();

    // Stable sort, so equal scores stay in insertion order
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    scored
}

/// Greedy maximal marginal relevance over pre-ranked candidates.
///
/// Each step picks the candidate maximising
/// `lambda * sim(query, c) - (1 - lambda) * max(sim(c, s))` over the already
/// selected `s`. On equal objective the better ranked candidate wins.
#[inline]
pub fn mmr_select(
    vectors: &[Vec<f32>],
    candidates: &[(usize, f32)],
    k: usize,
    lambda: f32,
) -> Vec<(usize, f32)> {
    let k = k.min(candidates.len());
    let mut remaining: Vec<(usize, f32)> = candidates.to_vec();
    let mut selected: Vec<(usize, f32)> = Vec::with_capacity(k);

    while selected.len() < k {
        let mut best_idx = 0;
        let mut best_mmr = f32::NEG_INFINITY;

        for (idx, &(position, relevance)) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&(chosen, _)| cosine_similarity(&vectors[position], &vectors[chosen]))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };

            let mmr = lambda * relevance - (1.0 - lambda) * redundancy;
            if mmr > best_mmr {
                best_mmr = mmr;
                best_idx = idx;
            }
        }

        selected.push(remaining.remove(best_idx));
    }

    selected
}

/// Cosine similarity, 0.0 when either vector has zero magnitude
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
