//! Streaming chunk types.
//!
//! One `ChatChunk` corresponds to one `data:` frame of an OpenAI-compatible
//! server-sent event stream.

use crate::response::Usage;
use serde::{Deserialize, Serialize};

/// Incremental piece of a streamed completion
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatChunk {
    /// Stream identifier assigned by the upstream
    #[serde(default)]
    pub id: String,

    /// Object type, normally "chat.completion.chunk"
    #[serde(default)]
    pub object: String,

    /// Unix timestamp of creation
    #[serde(default)]
    pub created: i64,

    /// Model producing the stream
    #[serde(default)]
    pub model: String,

    /// Chunk choices
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,

    /// Usage, usually only on the final chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatChunk {
    /// Build a chunk carrying a single content delta
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            object: "chat.completion.chunk".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some(content.into()),
                },
                finish_reason: None,
            }],
            ..Self::default()
        }
    }

    /// Attach usage to this chunk
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Content delta of the primary choice (index 0), empty if absent
    ///
    /// With `n > 1` upstreams interleave choices across chunks; only the
    /// primary one is accumulated.
    #[must_use]
    pub fn content(&self) -> String {
        self.choices
            .iter()
            .find(|choice| choice.index == 0)
            .and_then(|choice| choice.delta.content.clone())
            .unwrap_or_default()
    }
}

/// Choice inside a streamed chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    /// Choice index
    #[serde(default)]
    pub index: u32,

    /// Content delta
    #[serde(default)]
    pub delta: ChunkDelta,

    /// Set on the last chunk of a choice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Delta payload of a chunk choice
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkDelta {
    /// Role, present on the first chunk only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Content fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_content() {
        let chunk = ChatChunk::text("Hel");
        assert_eq!(chunk.content(), "Hel");
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn test_content_only_from_primary_choice() {
        let json = r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"m",
            "choices":[{"index":1,"delta":{"content":"second"}},{"index":0,"delta":{"content":"first"}}]}"#;
        let chunk: ChatChunk = serde_json::from_str(json).expect("parse");
        assert_eq!(chunk.content(), "first");

        let json = r#"{"id":"c2","object":"chat.completion.chunk","created":1,"model":"m",
            "choices":[{"index":1,"delta":{"content":"second"}}]}"#;
        let chunk: ChatChunk = serde_json::from_str(json).expect("parse");
        assert_eq!(chunk.content(), "");
    }

    #[test]
    fn test_parse_role_only_chunk() {
        let json = r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"m",
            "choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#;
        let chunk: ChatChunk = serde_json::from_str(json).expect("parse");
        assert_eq!(chunk.content(), "");
        assert_eq!(chunk.choices[0].delta.role.as_deref(), Some("assistant"));
    }
}
