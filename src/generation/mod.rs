// Language model seam
// Answer generation is reached through one blocking invocation/streaming contract

/// Lazily produced answer fragments, in order
pub type FragmentIter = Box<dyn Iterator<Item = crate::Result<String>> + Send>;

/// A text generation backend.
///
/// Implementations block; async callers go through `spawn_blocking`.
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Generate a complete answer of at most `max_tokens` tokens
    fn generate(&self, prompt: &str, max_tokens: u32) -> crate::Result<String>;

    /// Generate an answer fragment by fragment. Dropping the iterator stops
    /// generation.
    fn stream(&self, prompt: &str, max_tokens: u32) -> crate::Result<FragmentIter>;
}
