//! Prompt assembly
//!
//! Turns a stored history and a new question into the message list sent
//! to the provider, either through a text template or as native messages.

use crate::config::PromptMode;
use crate::llm::{ChatMessage, Role, Turn};

/// Persona used as the system message in native mode
pub const SYSTEM_PROMPT: &str = "You are a digital marketing assistant. Provide helpful advice and \
strategies for the user's digital marketing needs.";

/// Default template; `{chat_history}` and `{user_question}` are substituted.
pub const DEFAULT_TEMPLATE: &str = "You are a digital marketing assistant. Provide helpful advice \
and strategies for the user's digital marketing needs, considering the history of the conversation:

Chat history: {chat_history}

User question: {user_question}
";

const HISTORY_PLACEHOLDER: &str = "{chat_history}";
const QUESTION_PLACEHOLDER: &str = "{user_question}";

/// Text template with `{chat_history}` and `{user_question}` slots
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Render the template. Placeholders are substituted in one pass, so
    /// braces inside user text are never re-interpreted.
    pub fn render(&self, history: &[Turn], question: &str) -> String {
        let formatted = format_history(history);
        let mut out = String::with_capacity(self.template.len() + formatted.len() + question.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            if tail.starts_with(HISTORY_PLACEHOLDER) {
                out.push_str(&formatted);
                rest = &tail[HISTORY_PLACEHOLDER.len()..];
            } else if tail.starts_with(QUESTION_PLACEHOLDER) {
                out.push_str(question);
                rest = &tail[QUESTION_PLACEHOLDER.len()..];
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

/// Render turns as role-prefixed lines, oldest first
pub fn format_history(history: &[Turn]) -> String {
    history
        .iter()
        .map(|turn| format!("{}: {}", turn.role.label(), turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the provider message list for one question
pub fn build_messages(
    mode: PromptMode,
    template: &PromptTemplate,
    system: &str,
    history: &[Turn],
    question: &str,
) -> Vec<ChatMessage> {
    match mode {
        PromptMode::Template => vec![ChatMessage::from(&Turn::user(
            template.render(history, question),
        ))],
        PromptMode::Native => {
            let mut messages = Vec::with_capacity(history.len() + 2);
            if !system.is_empty() {
                messages.push(ChatMessage::from(&Turn::system(system)));
            }
            messages.extend(
                history
                    .iter()
                    .filter(|turn| turn.role != Role::System)
                    .map(ChatMessage::from),
            );
            messages.push(ChatMessage::from(&Turn::user(question)));
            messages
        }
    }
}
