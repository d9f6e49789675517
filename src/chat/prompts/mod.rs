#[cfg(test)]
mod tests;

use std::fmt;

/// Which template a question was answered with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// No usable evidence, the model answers from what it knows
    GeneralKnowledge,
    /// Retrieved passages are included in the prompt
    ContextAware,
}

impl fmt::Display for PromptKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GeneralKnowledge => write!(f, "general knowledge"),
            Self::ContextAware => write!(f, "document context"),
        }
    }
}

#[inline]
pub fn general_knowledge_prompt(question: &str) -> String {
    format!(
        "You are a helpful assistant. Answer the question using your general knowledge.\n\
         Be informative and helpful in your response.\n\
         \n\
         Question: {question}\n\
         Answer:"
    )
}

#[inline]
pub fn context_aware_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a helpful assistant. Answer the question using the provided context when \
         available and relevant.\n\
         If the context doesn't contain the answer, use your general knowledge to provide a \
         helpful response.\n\
         Always be helpful and informative, whether using context or general knowledge.\n\
         \n\
         Question: {question}\n\
         Context:\n\
         {context}\n\
         Answer:"
    )
}
