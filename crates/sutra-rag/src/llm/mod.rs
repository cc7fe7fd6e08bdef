//! Chat-completion provider seam.
//!
//! The engine never talks to a model vendor directly; it owns an
//! `Arc<dyn ChatModel>` injected at construction so tests can substitute
//! deterministic stubs.

pub mod external;
pub mod streaming;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use external::OpenAiCompatible;
pub use streaming::TokenStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.1,
            top_p: 0.95,
            stop_sequences: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub context_window: usize,
    pub supports_streaming: bool,
}

/// Core trait for chat-completion providers.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run a completion and return the full response text.
    async fn complete(&self, messages: &[ChatMessage], config: &GenerationConfig)
        -> Result<String>;

    /// Run a completion, yielding tokens as they arrive.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TokenStream>;

    fn info(&self) -> ProviderInfo;
}
