//! Decision provider contract.
//!
//! The agent loop only knows [`DecisionProvider`]: given the history and the
//! advertised tool schemas, produce either a final answer or an ordered list
//! of tool calls. [`OpenAiClient`] speaks the OpenAI-compatible chat API.

mod openai;

pub use openai::OpenAiClient;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Message, ToolCallRequest, ToolDefinition};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Decision request timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Decision provider unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Rate limits, server errors, network faults and timeouts.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::RateLimited { .. }
                | Self::Api { status: 500..=599, .. }
                | Self::Timeout(_)
                | Self::Unavailable(_)
        )
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecisionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl DecisionRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self { messages, tools }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Answer(String),
    ToolCalls {
        content: String,
        calls: Vec<ToolCallRequest>,
    },
}

impl Decision {
    /// An empty call list is an answer.
    pub fn from_parts(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        if calls.is_empty() {
            Self::Answer(content.into())
        } else {
            Self::ToolCalls {
                content: content.into(),
                calls,
            }
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Answer(text) => text,
            Self::ToolCalls { content, .. } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Answer(_) => &[],
            Self::ToolCalls { calls, .. } => calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }
}

#[async_trait]
pub trait DecisionProvider: Send + Sync {
    fn name(&self) -> &str {
        "decision-provider"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, ModelError>;
}
