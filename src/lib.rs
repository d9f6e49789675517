use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Document not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Index at {} is corrupt: {reason}", path.display())]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Language model unavailable: {0}")]
    ModelUnavailable(String),

    #[error(
        "Index was built with embedding model '{index_model}' but '{configured_model}' is configured"
    )]
    EmbeddingModelMismatch {
        index_model: String,
        configured_model: String,
    },

    #[error("Invalid retrieval settings: {0}")]
    InvalidSettings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Message safe to show to an end user. Never contains filesystem paths.
    #[inline]
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(_) => {
                "The application is misconfigured. Run `doc-chat config` to fix it.".to_string()
            }
            Self::NotFound(_) => "The selected document could not be found.".to_string(),
            Self::IndexCorrupt { .. } => "The stored index for this document is incomplete or \
                 unreadable. Rebuild it with `doc-chat index --rebuild`."
                .to_string(),
            Self::EmbeddingUnavailable(_) => "The embedding service is unavailable. Make sure \
                 Ollama is running and try again."
                .to_string(),
            Self::ModelUnavailable(_) => "The language model is unavailable. Make sure Ollama \
                 is running and the model is pulled."
                .to_string(),
            Self::EmbeddingModelMismatch { index_model, .. } => format!(
                "This document was indexed with the embedding model '{}'. Rebuild the index or \
                 switch the embedding model back.",
                index_model
            ),
            Self::InvalidSettings(reason) => format!("Invalid settings: {}", reason),
            Self::Io(_) | Self::Other(_) => {
                "An internal error occurred while processing the request.".to_string()
            }
        }
    }
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod context;
pub mod documents;
pub mod embeddings;
pub mod generation;
pub mod index;
pub mod ollama;
pub mod retrieval;
