
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::info;

use super::{Answer, AnswerError, AnswerOrchestrator, AnswerStream};
use crate::index::{IndexCacheManager, VectorIndex};
use crate::retrieval::RetrievalSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// The document questions are currently answered against
#[derive(Debug, Clone)]
pub struct ActiveDocument {
    pub path: PathBuf,
    pub index: Arc<VectorIndex>,
}

/// One user's conversation: at most one active document and the transcript
/// since it was selected
pub struct ChatSession {
    cache: Arc<IndexCacheManager>,
    orchestrator: AnswerOrchestrator,
    active: RwLock<Option<ActiveDocument>>,
    transcript: Mutex<Vec<ChatTurn>>,
}

impl ChatSession {
    #[inline]
    pub fn new(cache: Arc<IndexCacheManager>, orchestrator: AnswerOrchestrator) -> Self {
        Self {
            cache,
            orchestrator,
            active: RwLock::new(None),
            transcript: Mutex::new(Vec::new()),
        }
    }

    /// Make `path` the active document, building its index if needed.
    /// On failure the previous document stays active.
    #[inline]
    pub async fn select_document(&self, path: &Path) -> Result<Arc<VectorIndex>, AnswerError> {
        let index = self.cache.get_or_create(path).await?;

        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(ActiveDocument {
            path: path.to_path_buf(),
            index: Arc::clone(&index),
        });
        self.clear_transcript();

        info!(
            "Active document is now {} ({} chunks)",
            index.identity(),
            index.len()
        );
        Ok(index)
    }

    /// Go back to answering from general knowledge
    #[inline]
    pub fn clear_document(&self) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.clear_transcript();
    }

    #[inline]
    pub fn active_document(&self) -> Option<ActiveDocument> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Answer a question against the active document and record the exchange
    #[inline]
    pub async fn ask(
        &self,
        query: &str,
        settings: &RetrievalSettings,
    ) -> Result<Answer, AnswerError> {
        let index = self.active_index();
        let answer = self
            .orchestrator
            .answer(query, index.as_deref(), settings)
            .await?;

        self.record_exchange(query, &answer.text);
        Ok(answer)
    }

    /// Stream an answer against the active document. The caller records the
    /// exchange with [`Self::record_exchange`] once the text is complete.
    #[inline]
    pub async fn ask_stream(
        &self,
        query: &str,
        settings: &RetrievalSettings,
    ) -> Result<AnswerStream, AnswerError> {
        let index = self.active_index();
        self.orchestrator
            .answer_stream(query, index.as_deref(), settings)
            .await
    }

    #[inline]
    pub fn record_exchange(&self, question: &str, answer: &str) {
        let mut transcript = self.transcript.lock().unwrap_or_else(PoisonError::into_inner);
        transcript.push(ChatTurn {
            role: Role::User,
            content: question.to_string(),
        });
        transcript.push(ChatTurn {
            role: Role::Assistant,
            content: answer.to_string(),
        });
    }

    #[inline]
    pub fn transcript(&self) -> Vec<ChatTurn> {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[inline]
    pub fn clear_transcript(&self) {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Snapshot of the active index; the lock is released before any await
    fn active_index(&self) -> Option<Arc<VectorIndex>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| Arc::clone(&active.index))
    }
}
