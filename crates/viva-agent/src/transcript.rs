//! Convert conversation history to completion messages and readable transcripts.

use viva_core::types::{ConversationTurn, Role};
use viva_providers::ChatMessage;

/// Full ordered message list: system framing, then every turn.
pub fn history_to_messages(system_prompt: &str, history: &[ConversationTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(system_prompt));

    for turn in history {
        let message = match turn.role {
            Role::Candidate => ChatMessage::user(&turn.text),
            Role::Assistant => ChatMessage::assistant(&turn.text),
            Role::System => ChatMessage::system(&turn.text),
        };
        messages.push(message);
    }

    messages
}

/// Render the history as speaker-labelled lines for evaluation.
pub fn format_transcript(history: &[ConversationTurn]) -> String {
    history
        .iter()
        .filter(|t| t.role != Role::System)
        .map(|t| {
            let speaker = match t.role {
                Role::Candidate => "Candidate",
                _ => "Interviewer",
            };
            format!("{speaker}: {}", t.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read a stored transcript back into turns.
///
/// Accepts the `format_transcript` layout. Lines without a speaker label
/// continue the previous turn; blank lines are skipped.
pub fn parse_transcript(text: &str) -> Vec<ConversationTurn> {
    let mut turns: Vec<ConversationTurn> = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let labelled = line
            .split_once(':')
            .and_then(|(speaker, rest)| match speaker.trim().to_ascii_lowercase().as_str() {
                "candidate" => Some((Role::Candidate, rest.trim())),
                "interviewer" | "assistant" => Some((Role::Assistant, rest.trim())),
                _ => None,
            });

        match labelled {
            Some((role, rest)) => turns.push(ConversationTurn::new(role, rest)),
            None => match turns.last_mut() {
                Some(last) => {
                    last.text.push(' ');
                    last.text.push_str(line);
                }
                None => turns.push(ConversationTurn::candidate(line)),
            },
        }
    }

    turns
}
