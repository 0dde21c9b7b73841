//! InferenceEngine trait: the abstraction over one loaded local model.
//!
//! An engine is **blocking and not reentrant**: `generate` takes `&mut self`
//! and must only ever be driven from the executor's dedicated worker thread.
//! Nothing else in the process calls an engine directly.

use crate::error::EngineError;
use crate::message::PromptMessage;

/// A lazy sequence of generated text fragments.
///
/// Generation advances only as the iterator is pulled; dropping it stops the
/// engine at the next fragment boundary.
pub type FragmentIter<'a> = Box<dyn Iterator<Item = Result<String, EngineError>> + 'a>;

/// The core engine trait.
///
/// Implementations: Candle GGUF models (`local` feature), the echo
/// development engine, and recording stubs in tests.
pub trait InferenceEngine: Send + 'static {
    /// A human-readable name for this engine (e.g., "local/tinyllama").
    fn name(&self) -> &str;

    /// Start generating a reply to `prompt`, producing at most
    /// `max_output_tokens` tokens.
    ///
    /// Errors returned here happen before any fragment is produced. Errors
    /// yielded by the iterator happen mid-stream; fragments already yielded
    /// stand.
    fn generate<'a>(
        &'a mut self,
        prompt: &[PromptMessage],
        max_output_tokens: u32,
    ) -> Result<FragmentIter<'a>, EngineError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn generate<'a>(
        &'a mut self,
        prompt: &[PromptMessage],
        max_output_tokens: u32,
    ) -> Result<FragmentIter<'a>, EngineError> {
        (**self).generate(prompt, max_output_tokens)
    }
}
