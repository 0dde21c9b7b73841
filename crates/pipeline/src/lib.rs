//! The ragline request pipeline.
//!
//! A request moves through **Format → Retrieve → Budget → Queue → Stream**:
//!
//! 1. **Format** the caller's turns and append the persona directive
//! 2. **Retrieve** passages for the latest user turn within the scope filter
//! 3. **Budget** the prompt so it fits the context window minus reserved output
//! 4. **Queue** for the single inference engine (FIFO)
//! 5. **Stream** fragments back, then persist the exchange
//!
//! Pre-stream failures are returned as errors; failures after the first
//! fragment end the stream with an explicit error event.

pub mod budget;
pub mod executor;
pub mod format;
pub mod orchestrator;
pub mod stream_event;
pub mod token;

#[cfg(test)]
mod test_helpers;

pub use budget::{BudgetAllocator, BudgetDecision, BudgetReport, BudgetedPrompt};
pub use executor::{FragmentStream, InferenceExecutor};
pub use format::{FormattedConversation, format_conversation};
pub use orchestrator::{ChatRequest, ChatResponse, Pipeline, RequestState};
pub use stream_event::StreamEvent;
pub use token::TokenEstimator;
