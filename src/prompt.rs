use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvalidInputError;

pub const FORMAT_INSTRUCTIONS_PLACEHOLDER: &str = "{format_instructions}";

pub const DEFAULT_SYSTEM_TEMPLATE: &str = "You are a research assistant that will help generate a research paper.\n\
Answer the user query and use necessary tools.\n\
Wrap the output in this format and provide no other text\n\
{format_instructions}";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::System => "System",
            Role::Human => "Human",
            Role::Assistant => "AI",
        };
        f.write_str(label)
    }
}

/// One prior message in a caller-owned chat history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::new(Role::Human, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

/// Fully composed request payload for a single invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub messages: Vec<PromptMessage>,
}

impl RenderedPrompt {
    pub fn system_instruction(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
    }

    /// Flat transcript form, one `Role: content` block per message.
    pub fn render_text(&self) -> String {
        self.messages
            .iter()
            .map(|message| format!("{}: {}", message.role, message.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Debug)]
pub struct PromptBuilder {
    system_template: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            system_template: DEFAULT_SYSTEM_TEMPLATE.to_string(),
        }
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a custom system template. `{format_instructions}` is replaced
    /// with the parser's instructions; a template without the placeholder
    /// gets them appended.
    pub fn with_system_template(system_template: impl Into<String>) -> Self {
        Self {
            system_template: system_template.into(),
        }
    }

    pub fn system_template(&self) -> &str {
        &self.system_template
    }

    pub fn build(
        &self,
        query: &str,
        chat_history: &[ConversationTurn],
        format_instructions: &str,
    ) -> Result<RenderedPrompt, InvalidInputError> {
        if query.trim().is_empty() {
            return Err(InvalidInputError::EmptyQuery);
        }

        let mut messages = Vec::with_capacity(chat_history.len() + 2);
        messages.push(PromptMessage {
            role: Role::System,
            content: self.render_system(format_instructions),
        });

        messages.extend(chat_history.iter().map(|turn| PromptMessage {
            role: turn.role,
            content: turn.text.clone(),
        }));

        messages.push(PromptMessage {
            role: Role::Human,
            content: query.to_string(),
        });

        Ok(RenderedPrompt { messages })
    }

    fn render_system(&self, format_instructions: &str) -> String {
        if self.system_template.contains(FORMAT_INSTRUCTIONS_PLACEHOLDER) {
            self.system_template
                .replace(FORMAT_INSTRUCTIONS_PLACEHOLDER, format_instructions)
        } else {
            format!("{}\n{format_instructions}", self.system_template)
        }
    }
}
