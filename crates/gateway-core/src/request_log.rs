//! Durable record of one chat exchange.

use crate::request::ChatMessage;
use crate::response::Usage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Error text recorded when the caller goes away before the exchange ends
pub const CLIENT_DISCONNECTED: &str = "client disconnected";

/// Authenticated caller identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerId(String);

impl CallerId {
    /// Create a caller identity
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity used when authentication is disabled
    #[must_use]
    pub fn anonymous() -> Self {
        Self("anonymous".to_string())
    }

    /// The identity as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal status of a chat exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Upstream completed normally
    Success,
    /// Upstream reported an error
    Error,
    /// Caller went away before completion
    Interrupted,
}

impl RequestStatus {
    /// Status as stored text
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Interrupted => "interrupted",
        }
    }

    /// Parse stored text
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write-once log record of one chat exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestLog {
    /// Storage identifier, assigned on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Caller identity
    pub caller: CallerId,

    /// Provider name the exchange was routed to
    pub model_name: String,

    /// Request messages as a JSON array
    pub request_messages: String,

    /// Accumulated response text
    pub response_content: String,

    /// Prompt tokens
    pub prompt_tokens: u32,

    /// Completion tokens
    pub completion_tokens: u32,

    /// Total tokens
    pub total_tokens: u32,

    /// Wall-clock latency in milliseconds
    pub latency_ms: u64,

    /// Terminal status
    pub status: RequestStatus,

    /// Error text for error or interrupted exchanges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl RequestLog {
    /// Start a record for an exchange; messages are serialized once here
    #[must_use]
    pub fn new(caller: CallerId, model_name: impl Into<String>, messages: &[ChatMessage]) -> Self {
        Self {
            id: None,
            caller,
            model_name: model_name.into(),
            request_messages: serde_json::to_string(messages).unwrap_or_default(),
            response_content: String::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            latency_ms: 0,
            status: RequestStatus::Success,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Record the response text
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.response_content = content.into();
        self
    }

    /// Record token usage, if reported
    #[must_use]
    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        if let Some(usage) = usage {
            self.prompt_tokens = usage.prompt_tokens;
            self.completion_tokens = usage.completion_tokens;
            self.total_tokens = usage.total_tokens;
        }
        self
    }

    /// Record elapsed latency
    #[must_use]
    pub fn with_latency(mut self, elapsed: Duration) -> Self {
        self.latency_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Finalize as success
    #[must_use]
    pub fn success(mut self) -> Self {
        self.status = RequestStatus::Success;
        self.error_message = None;
        self
    }

    /// Finalize as error
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = RequestStatus::Error;
        self.error_message = Some(error.into());
        self
    }

    /// Finalize as interrupted by the caller
    #[must_use]
    pub fn interrupted(mut self) -> Self {
        self.status = RequestStatus::Interrupted;
        self.error_message = Some(CLIENT_DISCONNECTED.to_string());
        self
    }
}
