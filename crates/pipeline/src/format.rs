//! Conversation formatting: caller turns plus the persona directive.

use ragline_core::{ConversationMessage, PipelineError, PromptMessage, RetrievedPassage};

/// Header of the synthetic message carrying retrieved passages.
pub const CONTEXT_HEADER: &str = "Retrieved context:";

/// Appended to a passage cut short by the budget.
pub const TRUNCATION_MARKER: &str = " …[truncated]";

/// A conversation projected into prompt messages, before budgeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedConversation {
    /// Caller turns in chronological order.
    pub turns: Vec<PromptMessage>,
    /// The trailing persona directive, absent when blank.
    pub persona: Option<PromptMessage>,
}

/// Project `conversation` into prompt messages with `persona` trailing.
pub fn format_conversation(
    conversation: &[ConversationMessage],
    persona: &str,
) -> Result<FormattedConversation, PipelineError> {
    if conversation.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let persona = persona.trim();
    Ok(FormattedConversation {
        turns: conversation.iter().map(ConversationMessage::to_prompt).collect(),
        persona: (!persona.is_empty()).then(|| PromptMessage::system(persona)),
    })
}

/// The label line introducing one passage inside the context message.
pub fn passage_prefix(source_id: &str) -> String {
    format!("\n\n[source: {source_id}]\n")
}

/// Render one passage as it appears in the context message.
pub fn render_passage(passage: &RetrievedPassage) -> String {
    format!("{}{}", passage_prefix(&passage.source_id), passage.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_core::Role;

    #[test]
    fn empty_conversation_is_rejected() {
        let err = format_conversation(&[], "persona").unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));
    }

    #[test]
    fn turns_keep_order_and_persona_trails() {
        let conv = vec![
            ConversationMessage::user("q1"),
            ConversationMessage::assistant("a1"),
            ConversationMessage::user("q2"),
        ];
        let formatted = format_conversation(&conv, "  Be concise.  ").unwrap();
        let texts: Vec<_> = formatted.turns.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["q1", "a1", "q2"]);
        let persona = formatted.persona.unwrap();
        assert_eq!(persona.role, Role::System);
        assert_eq!(persona.content, "Be concise.");
    }

    #[test]
    fn blank_persona_is_omitted() {
        let formatted = format_conversation(&[ConversationMessage::user("hi")], " ").unwrap();
        assert!(formatted.persona.is_none());
    }

    #[test]
    fn passage_is_tagged_with_source() {
        let passage = RetrievedPassage::new("notes.md", "body", 0.5);
        assert_eq!(render_passage(&passage), "\n\n[source: notes.md]\nbody");
    }
}
