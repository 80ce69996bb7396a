//! Response types for the gateway.

use crate::request::MessageRole;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Chat completion response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    /// Response identifier assigned by the upstream
    #[serde(default)]
    pub id: String,

    /// Object type, normally "chat.completion"
    #[serde(default = "default_object")]
    pub object: String,

    /// Unix timestamp of creation
    #[serde(default)]
    pub created: i64,

    /// Model that produced the response
    #[serde(default)]
    pub model: String,

    /// Completion choices
    #[serde(default)]
    pub choices: Vec<Choice>,

    /// Token usage, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Provider-specific fields passed through verbatim
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_object() -> String {
    "chat.completion".to_string()
}

impl ChatResponse {
    /// Text of the first choice, empty if there is none
    #[must_use]
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map_or("", |choice| choice.message.content.as_str())
    }
}

/// A single completion choice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    /// Choice index
    #[serde(default)]
    pub index: u32,

    /// Generated message
    pub message: ResponseMessage,

    /// Why generation stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Message returned inside a choice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMessage {
    /// Role, normally assistant
    pub role: MessageRole,

    /// Generated text
    #[serde(default)]
    pub content: String,
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: u32,

    /// Tokens in the completion
    #[serde(default)]
    pub completion_tokens: u32,

    /// Total tokens
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Create usage from prompt and completion counts
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}
