// Answer orchestration and chat sessions
// Retrieval, context assembly and the language model wired together per question

pub mod prompts;
pub mod session;


use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::RagError;
use crate::context::assemble;
use crate::generation::LanguageModel;
use crate::index::VectorIndex;
use crate::retrieval::{RetrievalSettings, RetrievedChunk, Retriever};

pub use prompts::{PromptKind, context_aware_prompt, general_knowledge_prompt};
pub use session::{ActiveDocument, ChatSession, ChatTurn, Role};

/// Fragments buffered between the generation worker and the consumer
const STREAM_BUFFER: usize = 32;

/// A failure at the answering boundary. `message` is safe to show to a user.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AnswerError {
    pub message: String,
    #[source]
    pub cause: RagError,
}

impl From<RagError> for AnswerError {
    #[inline]
    fn from(cause: RagError) -> Self {
        Self {
            message: cause.user_message(),
            cause,
        }
    }
}

/// A generated answer with the passages it was grounded on
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    /// Empty unless sources were requested and usable context was found
    pub sources: Vec<RetrievedChunk>,
    pub prompt_kind: PromptKind,
}

/// An answer delivered fragment by fragment.
///
/// Dropping `fragments` stops generation; fragments already received stay valid.
pub struct AnswerStream {
    pub sources: Vec<RetrievedChunk>,
    pub prompt_kind: PromptKind,
    pub fragments: BoxStream<'static, Result<String, AnswerError>>,
}

/// Sources of one file with the pages they came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGroup {
    pub source: PathBuf,
    pub pages: Vec<u32>,
    pub chunk_count: usize,
}

/// Summarise sources per file, files and pages sorted
#[inline]
pub fn group_sources(sources: &[RetrievedChunk]) -> Vec<SourceGroup> {
    let mut groups: BTreeMap<&PathBuf, (BTreeSet<u32>, usize)> = BTreeMap::new();
    for retrieved in sources {
        let entry = groups.entry(&retrieved.chunk.metadata.source).or_default();
        entry.0.extend(retrieved.chunk.metadata.page);
        entry.1 += 1;
    }

    groups
        .into_iter()
        .map(|(source, (pages, chunk_count))| SourceGroup {
            source: source.clone(),
            pages: pages.into_iter().collect(),
            chunk_count,
        })
        .collect()
}

/// Prompt chosen for a question, with the sources to report
struct PreparedPrompt {
    prompt: String,
    kind: PromptKind,
    sources: Vec<RetrievedChunk>,
}

/// Coordinates retrieval, context assembly and one language model call per question
#[derive(Clone)]
pub struct AnswerOrchestrator {
    retriever: Retriever,
    model: Arc<dyn LanguageModel>,
}

impl AnswerOrchestrator {
    #[inline]
    pub fn new(retriever: Retriever, model: Arc<dyn LanguageModel>) -> Self {
        Self { retriever, model }
    }

    /// Answer `query`, grounding it on `index` when one is given and yields
    /// enough context
    #[inline]
    pub async fn answer(
        &self,
        query: &str,
        index: Option<&VectorIndex>,
        settings: &RetrievalSettings,
    ) -> Result<Answer, AnswerError> {
        let prepared = self.prepare(query, index, settings).await?;

        let model = Arc::clone(&self.model);
        let max_tokens = settings.max_answer_tokens;
        let text =
            tokio::task::spawn_blocking(move || model.generate(&prepared.prompt, max_tokens))
                .await
                .map_err(|e| RagError::Other(anyhow::anyhow!("Generation task failed: {}", e)))??;

        debug!("Generated {} chars of answer", text.chars().count());
        Ok(Answer {
            text,
            sources: prepared.sources,
            prompt_kind: prepared.kind,
        })
    }

    /// Like [`Self::answer`], but the sources are returned up front and the
    /// text arrives as a stream
    #[inline]
    pub async fn answer_stream(
        &self,
        query: &str,
        index: Option<&VectorIndex>,
        settings: &RetrievalSettings,
    ) -> Result<AnswerStream, AnswerError> {
        let PreparedPrompt {
            prompt,
            kind,
            sources,
        } = self.prepare(query, index, settings).await?;

        let (tx, rx) = mpsc::channel::<Result<String, RagError>>(STREAM_BUFFER);
        let model = Arc::clone(&self.model);
        let max_tokens = settings.max_answer_tokens;

        tokio::task::spawn_blocking(move || {
            let fragments = match model.stream(&prompt, max_tokens) {
                Ok(fragments) => fragments,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };

            for fragment in fragments {
                let failed = fragment.is_err();
                if tx.blocking_send(fragment).is_err() {
                    debug!("Answer stream dropped, stopping generation");
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        let fragments = stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|fragment| (fragment.map_err(AnswerError::from), rx))
        })
        .boxed();

        Ok(AnswerStream {
            sources,
            prompt_kind: kind,
            fragments,
        })
    }

    async fn prepare(
        &self,
        query: &str,
        index: Option<&VectorIndex>,
        settings: &RetrievalSettings,
    ) -> Result<PreparedPrompt, RagError> {
        settings.validate()?;

        let Some(index) = index else {
            debug!("No document selected, answering from general knowledge");
            return Ok(general(query));
        };

        let retrieved = self.retriever.retrieve(index, query, settings).await?;
        let context = assemble(&retrieved, settings.max_context_chars);

        if !context.is_usable() {
            info!(
                "Context from {} too short ({} chars), falling back to general knowledge",
                index.identity(),
                context.text.trim().chars().count()
            );
            return Ok(general(query));
        }

        let sources = if settings.show_context {
            context.used_chunks
        } else {
            Vec::new()
        };

        Ok(PreparedPrompt {
            prompt: context_aware_prompt(query, &context.text),
            kind: PromptKind::ContextAware,
            sources,
        })
    }
}

fn general(query: &str) -> PreparedPrompt {
    PreparedPrompt {
        prompt: general_knowledge_prompt(query),
        kind: PromptKind::GeneralKnowledge,
        sources: Vec::new(),
    }
}
