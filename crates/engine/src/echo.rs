//! Echo engine: a deterministic development engine.
//!
//! Streams the most recent user message back word by word. Needs no model
//! files, so the whole pipeline can run end to end on any machine.

use ragline_core::message::Role;
use ragline_core::{EngineError, FragmentIter, InferenceEngine, PromptMessage};

pub struct EchoEngine;

impl EchoEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    fn generate<'a>(
        &'a mut self,
        prompt: &[PromptMessage],
        max_output_tokens: u32,
    ) -> Result<FragmentIter<'a>, EngineError> {
        let text = prompt
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .ok_or_else(|| EngineError::MalformedPrompt("prompt has no user message".into()))?;

        let words: Vec<String> = text
            .split_whitespace()
            .take(max_output_tokens as usize)
            .enumerate()
            .map(|(i, w)| if i == 0 { w.to_string() } else { format!(" {w}") })
            .collect();

        Ok(Box::new(words.into_iter().map(Ok::<String, EngineError>)))
    }
}
