//! Fixed prompt template: one system instruction followed by the user turn.

use serde::Serialize;

use crate::types::ChatMessage;

pub const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant.";

/// A filled template, ready for a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Render as provider chat messages, system first.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system".into(),
                content: self.system.clone(),
            },
            ChatMessage {
                role: "user".into(),
                content: self.user.clone(),
            },
        ]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build(&self, user_input: &str) -> Prompt {
        Prompt {
            system: SYSTEM_INSTRUCTION.into(),
            user: user_input.into(),
        }
    }
}
