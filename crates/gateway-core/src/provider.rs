//! Provider adapter trait and type tags.
//!
//! An adapter is bound to exactly one [`ProviderConfig`](crate::ProviderConfig)
//! snapshot at construction time. Adapters are shared as [`AdapterHandle`]s so
//! a caller keeps using the instance it resolved even if the live slot is
//! replaced mid-call.

use crate::error::GatewayResult;
use crate::request::ChatRequest;
use crate::response::ChatResponse;
use crate::streaming::ChatChunk;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Ordered, finite sequence of chunks or errors produced by one streamed exchange.
///
/// Chunks and errors share one stream so their relative order is preserved.
/// An `Err` item is terminal.
pub type ChunkStream = BoxStream<'static, GatewayResult<ChatChunk>>;

/// Shared-ownership handle to a live adapter
pub type AdapterHandle = Arc<dyn ProviderAdapter>;

/// Tag selecting the factory used to build an adapter.
///
/// The set of tags is open: registering a factory under a new tag needs no
/// change to existing code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AdapterType(String);

impl AdapterType {
    /// OpenAI API
    pub const OPENAI: &'static str = "openai";
    /// vLLM OpenAI-compatible server
    pub const VLLM: &'static str = "vllm";
    /// Ollama OpenAI-compatible endpoint
    pub const OLLAMA: &'static str = "ollama";

    /// Create a new type tag. Tags are case-insensitive and stored lowercase.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into().trim().to_ascii_lowercase())
    }

    /// The tag as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AdapterType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for AdapterType {
    fn from(tag: String) -> Self {
        Self::new(tag)
    }
}

impl From<AdapterType> for String {
    fn from(tag: AdapterType) -> Self {
        tag.0
    }
}

/// Runtime object implementing the chat operations against one provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync + fmt::Debug {
    /// Provider name this adapter was built for
    fn name(&self) -> &str;

    /// Type tag of the factory that built this adapter
    fn adapter_type(&self) -> &AdapterType;

    /// Buffered chat: one complete response
    ///
    /// # Errors
    /// Returns an upstream error if the call fails
    async fn chat(&self, request: ChatRequest) -> GatewayResult<ChatResponse>;

    /// Streamed chat: an ordered chunk sequence
    ///
    /// Dropping the returned stream must release the upstream connection.
    ///
    /// # Errors
    /// Returns an upstream error if the stream cannot be opened
    async fn chat_stream(&self, request: ChatRequest) -> GatewayResult<ChunkStream>;
}
