//! Token-budget allocation: what to keep, truncate, or drop.
//!
//! Given a formatted conversation and ranked passages, produce the ordered
//! message list sent to the engine. The estimated token sum of the output
//! never exceeds `context_window - reserved_output_tokens`.
//!
//! # Algorithm
//!
//! 1. Walk the conversation from its trailing end: newest turn, persona
//!    directive, then older turns. Each message is accepted whole while it
//!    fits. The first message that does not fit ends the walk; everything
//!    after it in walk order is dropped. A long persona therefore never
//!    pushes out the newest turn.
//! 2. Walk passages in ranked order with the budget that remains. A passage
//!    is kept whole if it fits. Otherwise as much of its text as fits is kept
//!    with a truncation marker, and the walk ends. When the remaining budget
//!    cannot even hold the passage framing (header, source label, marker),
//!    the passage is dropped instead.
//! 3. Emit `[retrieved context] + accepted turns + persona`.
//!
//! Allocation is deterministic: identical inputs always produce identical
//! outputs.

use ragline_config::BudgetConfig;
use ragline_core::{PromptMessage, RetrievedPassage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::format::{
    CONTEXT_HEADER, FormattedConversation, TRUNCATION_MARKER, passage_prefix, render_passage,
};
use crate::token::TokenEstimator;

// ── Types ─────────────────────────────────────────────────────────────────

/// What the allocator did with one candidate message or passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum BudgetDecision {
    Accepted,
    Dropped,
    /// Only the first `kept_chars` characters were kept.
    Truncated { kept_chars: usize },
}

impl BudgetDecision {
    pub fn is_kept(&self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

/// Detailed record of one allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetReport {
    /// `context_window - reserved_output_tokens`, saturating at zero.
    pub safe_limit: usize,
    /// Estimated tokens of the emitted messages.
    pub total_tokens: usize,
    /// Tokens of the retrieved-context message (0 when absent).
    pub context_tokens: usize,
    /// One decision per conversation turn, chronological.
    pub turns: Vec<BudgetDecision>,
    /// Decision for the persona directive, if there is one.
    pub persona: Option<BudgetDecision>,
    /// One decision per passage, in ranked order.
    pub passages: Vec<BudgetDecision>,
    /// Tokens needed for the newest turn alone.
    pub required_tokens: usize,
}

impl BudgetReport {
    /// Whether the newest turn made it into the prompt.
    pub fn newest_turn_kept(&self) -> bool {
        matches!(self.turns.last(), Some(BudgetDecision::Accepted))
    }

    pub fn turns_dropped(&self) -> usize {
        self.turns.iter().filter(|d| !d.is_kept()).count()
    }

    pub fn passages_kept(&self) -> usize {
        self.passages.iter().filter(|d| d.is_kept()).count()
    }

    pub fn passage_truncated(&self) -> bool {
        self.passages
            .iter()
            .any(|d| matches!(d, BudgetDecision::Truncated { .. }))
    }
}

/// The final ordered prompt, the only artifact handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetedPrompt {
    pub messages: Vec<PromptMessage>,
    pub report: BudgetReport,
}

impl BudgetedPrompt {
    /// A prompt is viable only if it still carries the newest turn.
    pub fn is_viable(&self) -> bool {
        self.report.newest_turn_kept()
    }
}

// ── Allocator ─────────────────────────────────────────────────────────────

/// The budget allocator. Stateless; create one and reuse it.
#[derive(Debug, Clone)]
pub struct BudgetAllocator {
    estimator: TokenEstimator,
    context_window: usize,
    reserved_output_tokens: usize,
}

impl BudgetAllocator {
    pub fn new(
        estimator: TokenEstimator,
        context_window: usize,
        reserved_output_tokens: usize,
    ) -> Self {
        Self {
            estimator,
            context_window,
            reserved_output_tokens,
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(
            TokenEstimator::from_config(config),
            config.context_window,
            config.reserved_output_tokens,
        )
    }

    pub fn safe_limit(&self) -> usize {
        self.context_window
            .saturating_sub(self.reserved_output_tokens)
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Build the budgeted prompt. Always succeeds; check
    /// [`BudgetedPrompt::is_viable`] before invoking the engine.
    pub fn allocate(
        &self,
        conversation: &FormattedConversation,
        passages: &[RetrievedPassage],
    ) -> BudgetedPrompt {
        let safe_limit = self.safe_limit();
        let est = &self.estimator;

        // ── Conversation: trailing end first, whole messages only ──────────
        let mut used = 0usize;
        let mut stopped = false;
        let mut admit = |cost: usize| {
            if !stopped && used + cost <= safe_limit {
                used += cost;
                BudgetDecision::Accepted
            } else {
                stopped = true;
                BudgetDecision::Dropped
            }
        };

        let turns = &conversation.turns;
        let mut turn_decisions = vec![BudgetDecision::Dropped; turns.len()];
        let newest_cost = turns.last().map_or(0, |t| est.estimate_message(t));
        if let Some(last) = turn_decisions.last_mut() {
            *last = admit(newest_cost);
        }

        let persona_decision = conversation
            .persona
            .as_ref()
            .map(|p| admit(est.estimate_message(p)));

        for (i, turn) in turns.iter().enumerate().rev().skip(1) {
            turn_decisions[i] = admit(est.estimate_message(turn));
        }
        let conversation_tokens = used;
        let required_tokens = newest_cost;

        // ── Passages: ranked order, the last one may be cut ────────────────
        let remaining = safe_limit - conversation_tokens;
        let mut content = String::from(CONTEXT_HEADER);
        let mut passage_decisions = Vec::with_capacity(passages.len());
        let mut kept_any = false;
        let mut halted = false;

        for passage in passages {
            if halted {
                passage_decisions.push(BudgetDecision::Dropped);
                continue;
            }

            let whole = format!("{content}{}", render_passage(passage));
            if est.estimate_content(&whole) <= remaining {
                content = whole;
                kept_any = true;
                passage_decisions.push(BudgetDecision::Accepted);
                continue;
            }

            halted = true;
            let frame = format!("{content}{}", passage_prefix(&passage.source_id));
            let frame_chars = frame.chars().count() + TRUNCATION_MARKER.chars().count();
            let kept_chars = est.max_content_chars(remaining).saturating_sub(frame_chars);
            if kept_chars == 0 {
                passage_decisions.push(BudgetDecision::Dropped);
                continue;
            }

            let cut: String = passage.text.chars().take(kept_chars).collect();
            content = format!("{frame}{cut}{TRUNCATION_MARKER}");
            kept_any = true;
            passage_decisions.push(BudgetDecision::Truncated { kept_chars });
        }

        // ── Assemble ───────────────────────────────────────────────────────
        let mut messages = Vec::with_capacity(turns.len() + 2);
        let context_tokens = if kept_any {
            let tokens = est.estimate_content(&content);
            messages.push(PromptMessage::system(content));
            tokens
        } else {
            0
        };

        messages.extend(
            turns
                .iter()
                .zip(&turn_decisions)
                .filter(|(_, d)| d.is_kept())
                .map(|(t, _)| t.clone()),
        );
        if let (Some(persona), Some(BudgetDecision::Accepted)) =
            (&conversation.persona, persona_decision)
        {
            messages.push(persona.clone());
        }

        let report = BudgetReport {
            safe_limit,
            total_tokens: conversation_tokens + context_tokens,
            context_tokens,
            turns: turn_decisions,
            persona: persona_decision,
            passages: passage_decisions,
            required_tokens,
        };

        debug!(
            safe_limit,
            total_tokens = report.total_tokens,
            turns_dropped = report.turns_dropped(),
            passages_kept = report.passages_kept(),
            passage_truncated = report.passage_truncated(),
            "Prompt budgeted"
        );

        BudgetedPrompt { messages, report }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format_conversation;
    use ragline_core::{ConversationMessage, Role};

    const PERSONA: &str = "You are a helpful assistant.";

    fn allocator(window: usize, reserved: usize) -> BudgetAllocator {
        BudgetAllocator::new(TokenEstimator::default(), window, reserved)
    }

    fn conv(turns: &[(Role, &str)]) -> FormattedConversation {
        let messages: Vec<_> = turns
            .iter()
            .map(|(role, text)| ConversationMessage::new(*role, *text))
            .collect();
        format_conversation(&messages, PERSONA).unwrap()
    }

    fn passage(source: &str, text: &str) -> RetrievedPassage {
        RetrievedPassage::new(source, text, 0.9)
    }

    fn prompt_tokens(allocator: &BudgetAllocator, prompt: &BudgetedPrompt) -> usize {
        allocator.estimator().estimate_messages(&prompt.messages)
    }

    #[test]
    fn persona_and_single_turn_fit_small_window() {
        let alloc = allocator(100, 20);
        let prompt = alloc.allocate(&conv(&[(Role::User, "What is X?")]), &[]);

        assert_eq!(
            prompt.messages,
            vec![PromptMessage::user("What is X?"), PromptMessage::system(PERSONA)]
        );
        assert!(prompt.is_viable());
        assert_eq!(prompt.report.context_tokens, 0);
        assert!(prompt_tokens(&alloc, &prompt) <= 80);
    }

    #[test]
    fn oversized_history_is_dropped_newest_kept() {
        let huge = "x".repeat(4_000);
        let mut turns: Vec<(Role, &str)> = (0..50)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                (role, huge.as_str())
            })
            .collect();
        turns.push((Role::User, "And the newest question?"));

        let alloc = allocator(1_000, 200);
        let prompt = alloc.allocate(&conv(&turns), &[]);

        assert!(prompt.is_viable());
        assert_eq!(prompt.report.turns_dropped(), 50);
        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0].content, "And the newest question?");
        assert!(prompt.report.total_tokens <= alloc.safe_limit());
    }

    #[test]
    fn trailing_turns_accepted_until_first_misfit() {
        // Each 40-char turn costs 10 + 4 = 14 tokens; persona costs 7 + 4 = 11.
        let t = "y".repeat(40);
        let big = "z".repeat(400);
        let turns = vec![
            (Role::User, t.as_str()),
            (Role::Assistant, big.as_str()),
            (Role::User, t.as_str()),
            (Role::Assistant, t.as_str()),
            (Role::User, t.as_str()),
        ];
        let alloc = allocator(60, 0);
        let prompt = alloc.allocate(&conv(&turns), &[]);

        // three turns 42 + persona 11 = 53 <= 60; the big turn stops the walk
        // even though the oldest turn alone would fit.
        use BudgetDecision::*;
        assert_eq!(
            prompt.report.turns,
            vec![Dropped, Dropped, Accepted, Accepted, Accepted]
        );
        assert_eq!(prompt.report.total_tokens, 53);
    }

    #[test]
    fn newest_turn_too_large_is_not_viable() {
        let huge = "q".repeat(1_000);
        let alloc = allocator(100, 20);
        let prompt = alloc.allocate(&conv(&[(Role::User, huge.as_str())]), &[]);

        assert!(!prompt.is_viable());
        assert_eq!(prompt.report.required_tokens, 254);
        assert!(prompt.report.total_tokens <= 80);
    }

    #[test]
    fn long_persona_never_displaces_newest_turn() {
        // safe 80; "hi" costs 1 + 4 = 5; a 400-char persona costs 100 + 4.
        let alloc = allocator(100, 20);
        let messages = vec![ConversationMessage::user("hi")];
        let formatted = format_conversation(&messages, &"p".repeat(400)).unwrap();
        let prompt = alloc.allocate(&formatted, &[]);

        assert!(prompt.is_viable());
        assert_eq!(prompt.report.turns, vec![BudgetDecision::Accepted]);
        assert_eq!(prompt.report.persona, Some(BudgetDecision::Dropped));
        assert_eq!(prompt.report.required_tokens, 5);
        assert_eq!(prompt.messages, vec![PromptMessage::user("hi")]);
    }

    #[test]
    fn dropped_persona_ends_the_walk() {
        // newest 5 + persona 104 > 80, so older turns are dropped as well.
        let alloc = allocator(100, 20);
        let messages = vec![
            ConversationMessage::user("earlier"),
            ConversationMessage::assistant("reply"),
            ConversationMessage::user("hi"),
        ];
        let formatted = format_conversation(&messages, &"p".repeat(400)).unwrap();
        let prompt = alloc.allocate(&formatted, &[]);

        use BudgetDecision::*;
        assert_eq!(prompt.report.turns, vec![Dropped, Dropped, Accepted]);
        assert_eq!(prompt.report.total_tokens, 5);
    }

    #[test]
    fn reserved_exceeding_window_accepts_nothing() {
        let alloc = allocator(100, 150);
        let prompt = alloc.allocate(
            &conv(&[(Role::User, "hello")]),
            &[passage("a", "some passage")],
        );
        assert_eq!(alloc.safe_limit(), 0);
        assert!(prompt.messages.is_empty());
        assert_eq!(prompt.report.total_tokens, 0);
        assert!(!prompt.is_viable());
    }

    #[test]
    fn empty_conversation_may_hold_only_context() {
        let alloc = allocator(1_000, 0);
        let formatted = FormattedConversation {
            turns: vec![],
            persona: None,
        };
        let prompt = alloc.allocate(&formatted, &[passage("a", "alpha")]);
        assert_eq!(prompt.messages.len(), 1);
        assert!(prompt.messages[0].content.starts_with(CONTEXT_HEADER));
        assert!(!prompt.is_viable());
    }

    #[test]
    fn context_message_comes_first_and_tags_sources() {
        let alloc = allocator(1_000, 100);
        let prompt = alloc.allocate(
            &conv(&[(Role::User, "q")]),
            &[passage("a.md", "alpha text"), passage("b.md", "beta text")],
        );

        assert_eq!(prompt.messages.len(), 3);
        let context = &prompt.messages[0];
        assert_eq!(context.role, Role::System);
        assert_eq!(
            context.content,
            "Retrieved context:\n\n[source: a.md]\nalpha text\n\n[source: b.md]\nbeta text"
        );
        assert_eq!(prompt.messages[1].content, "q");
        assert_eq!(prompt.messages[2].content, PERSONA);
        assert_eq!(prompt.report.passages_kept(), 2);
        assert!(!prompt.report.passage_truncated());
    }

    #[test]
    fn passage_over_budget_is_truncated_not_dropped() {
        // safe 100; persona 11 + "q" 5 = 16; 84 tokens remain for context.
        let alloc = allocator(120, 20);
        let text = "w".repeat(2_000);
        let prompt = alloc.allocate(&conv(&[(Role::User, "q")]), &[passage("doc", &text)]);

        let context = &prompt.messages[0].content;
        assert!(context.ends_with(TRUNCATION_MARKER));
        match prompt.report.passages[0] {
            BudgetDecision::Truncated { kept_chars } => {
                assert!(kept_chars > 0);
                assert!(kept_chars < text.len());
            }
            other => panic!("expected truncation, got {other:?}"),
        }
        assert!(prompt.report.total_tokens <= alloc.safe_limit());
        assert_eq!(prompt_tokens(&alloc, &prompt), prompt.report.total_tokens);
        // The whole remaining budget is used, give or take one token of rounding.
        assert!(prompt.report.total_tokens >= alloc.safe_limit() - 1);
    }

    #[test]
    fn truncation_stops_the_passage_walk() {
        let alloc = allocator(120, 20);
        let long = "w".repeat(2_000);
        let prompt = alloc.allocate(
            &conv(&[(Role::User, "q")]),
            &[
                passage("a", "short"),
                passage("b", &long),
                passage("c", "tiny"),
            ],
        );
        assert_eq!(prompt.report.passages[0], BudgetDecision::Accepted);
        assert!(matches!(
            prompt.report.passages[1],
            BudgetDecision::Truncated { .. }
        ));
        assert_eq!(prompt.report.passages[2], BudgetDecision::Dropped);
        assert!(!prompt.messages[0].content.contains("[source: c]"));
    }

    #[test]
    fn passage_dropped_when_no_room_for_text() {
        // persona 11 + turn 5 = 16 of 20; 4 tokens cannot hold overhead + header.
        let alloc = allocator(20, 0);
        let prompt = alloc.allocate(&conv(&[(Role::User, "q")]), &[passage("a", "alpha")]);
        assert_eq!(prompt.report.passages, vec![BudgetDecision::Dropped]);
        assert_eq!(prompt.messages.len(), 2);
    }

    #[test]
    fn passage_dropped_when_budget_cannot_hold_framing() {
        // safe 30; persona 11 + "q" 5 = 16; 14 tokens remain, less than the
        // header, label, marker and overhead need.
        let alloc = allocator(30, 0);
        let text = "w".repeat(2_000);
        let prompt = alloc.allocate(&conv(&[(Role::User, "q")]), &[passage("doc", &text)]);

        assert_eq!(prompt.report.passages, vec![BudgetDecision::Dropped]);
        assert_eq!(prompt.report.context_tokens, 0);
        assert!(prompt_tokens(&alloc, &prompt) <= alloc.safe_limit());
    }

    #[test]
    fn no_passages_means_no_context_message() {
        let alloc = allocator(10_000, 4_000);
        let prompt = alloc.allocate(&conv(&[(Role::User, "q")]), &[]);
        assert!(prompt.messages.iter().all(|m| !m.content.starts_with(CONTEXT_HEADER)));
    }

    #[test]
    fn allocation_is_idempotent() {
        let alloc = allocator(300, 50);
        let long = "lorem ipsum ".repeat(100);
        let formatted = conv(&[
            (Role::User, "first"),
            (Role::Assistant, "reply"),
            (Role::User, "second"),
        ]);
        let passages = vec![passage("a", &long), passage("b", "beta")];

        let first = alloc.allocate(&formatted, &passages);
        let second = alloc.allocate(&formatted, &passages);
        assert_eq!(first, second);
    }

    #[test]
    fn budget_bound_holds_across_sweep() {
        let long_turn = "history ".repeat(30);
        let turns: Vec<(Role, &str)> = (0..12)
            .map(|i| match i % 3 {
                0 => (Role::User, "short question"),
                1 => (Role::Assistant, long_turn.as_str()),
                _ => (Role::User, "another question about the documents"),
            })
            .collect();
        let formatted = conv(&turns);
        let passage_text = "passage text with several words ".repeat(20);
        let passages = vec![
            passage("a", &passage_text),
            passage("b", "brief"),
            passage("c", &passage_text),
        ];

        for window in (0..=600).step_by(7) {
            for reserved in [0, 10, 50, 200] {
                let alloc = allocator(window, reserved);
                let prompt = alloc.allocate(&formatted, &passages);
                let tokens = prompt_tokens(&alloc, &prompt);
                assert!(
                    tokens <= alloc.safe_limit(),
                    "window {window} reserved {reserved}: {tokens} > {}",
                    alloc.safe_limit()
                );
                assert_eq!(tokens, prompt.report.total_tokens);

                // Newest turn (13 tokens) fits => kept
                if alloc.safe_limit() >= 13 {
                    assert!(prompt.is_viable(), "window {window} reserved {reserved}");
                }
                // ...and with the persona (11 tokens) it trails the newest turn
                if alloc.safe_limit() >= 24 {
                    assert!(prompt.is_viable(), "window {window} reserved {reserved}");
                    assert_eq!(
                        prompt.messages[prompt.messages.len() - 2].content,
                        "another question about the documents"
                    );
                }
            }
        }
    }

    #[test]
    fn bound_holds_for_other_ratios() {
        let formatted = conv(&[(Role::User, "what does the manual say about pumps")]);
        let text = "pumps ".repeat(200);
        let passages = vec![passage("manual.pdf", &text)];
        for cpt in 1..=6 {
            for overhead in 0..=5 {
                for window in (0..300).step_by(11) {
                    let alloc =
                        BudgetAllocator::new(TokenEstimator::new(cpt, overhead), window, 0);
                    let prompt = alloc.allocate(&formatted, &passages);
                    assert!(
                        alloc.estimator().estimate_messages(&prompt.messages)
                            <= alloc.safe_limit()
                    );
                }
            }
        }
    }

    #[test]
    fn report_serializes_decisions() {
        let json = serde_json::to_string(&BudgetDecision::Truncated { kept_chars: 12 }).unwrap();
        assert_eq!(json, r#"{"decision":"truncated","kept_chars":12}"#);
    }
}
