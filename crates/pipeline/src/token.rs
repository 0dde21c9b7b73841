//! Token estimation utilities.
//!
//! Uses a character-based heuristic: `ceil(chars / chars_per_token)` plus a
//! fixed per-message overhead for role markers and delimiters. Both constants
//! come from configuration. The estimate is monotonic in text length, which
//! is all the budget allocator relies on.

use ragline_config::BudgetConfig;
use ragline_core::PromptMessage;

/// Character-heuristic token estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimator {
    chars_per_token: usize,
    message_overhead: usize,
}

impl TokenEstimator {
    pub fn new(chars_per_token: usize, message_overhead: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
            message_overhead,
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.chars_per_token, config.message_overhead_tokens)
    }

    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }

    pub fn message_overhead(&self) -> usize {
        self.message_overhead
    }

    /// Estimate the token count for a string. Rounds up.
    pub fn estimate_text(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    /// Estimate tokens for one message including per-message overhead.
    pub fn estimate_message(&self, message: &PromptMessage) -> usize {
        self.estimate_content(&message.content)
    }

    /// Estimate tokens for a message with the given content.
    pub fn estimate_content(&self, content: &str) -> usize {
        self.message_overhead + self.estimate_text(content)
    }

    /// Estimate tokens for a slice of messages.
    pub fn estimate_messages(&self, messages: &[PromptMessage]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    /// Most characters a message body may hold within `tokens`.
    pub fn max_content_chars(&self, tokens: usize) -> usize {
        tokens.saturating_sub(self.message_overhead) * self.chars_per_token
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(4, 4)
    }
}
