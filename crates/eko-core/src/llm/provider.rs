//! The provider capability consumed by the engine.
//!
//! Every backend implements [`LlmProvider`].  The closed set of concrete
//! variants is selected through [`ProviderSpec::into_provider`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EkoError, Result};
use crate::llm::client::{LlmClient, LlmClientConfig};
use crate::llm::types::{LlmParams, LlmResponse, Message, ToolCall};

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short identifier used in logs (e.g. `"anthropic"`).
    fn name(&self) -> &str;

    /// Send the conversation and wait for the complete response.
    async fn generate_text(&self, messages: &[Message], params: &LlmParams)
    -> Result<LlmResponse>;

    /// Send the conversation in streaming mode.  Events are delivered to
    /// `handler` as they arrive; the aggregated response is also returned.
    async fn generate_stream(
        &self,
        messages: &[Message],
        params: &LlmParams,
        handler: &mut (dyn StreamHandler + Send),
    ) -> Result<LlmResponse>;
}

/// Typed receiver for streaming events.  Every method defaults to a no-op.
pub trait StreamHandler {
    /// The request was accepted and the stream opened.
    fn on_start(&mut self) {}

    /// A text delta arrived.
    fn on_content(&mut self, _delta: &str) {}

    /// A tool call finished streaming.
    fn on_tool_use(&mut self, _call: &ToolCall) {}

    /// The stream completed.
    fn on_complete(&mut self, _response: &LlmResponse) {}

    /// The stream failed.
    fn on_error(&mut self, _error: &EkoError) {}
}

/// Handler that ignores every event.
#[derive(Debug, Default)]
pub struct NoopHandler;

impl StreamHandler for NoopHandler {}

// ---------------------------------------------------------------------------
// Provider construction
// ---------------------------------------------------------------------------

/// The ways a caller can name a provider.
#[derive(Clone)]
pub enum ProviderSpec {
    /// An Anthropic API key; the default model is used.
    ApiKey(String),
    /// A full client configuration.
    Config(LlmClientConfig),
    /// A ready-made provider.
    Client(Arc<dyn LlmProvider>),
}

/// Model used when a provider is named by API key alone.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

impl ProviderSpec {
    /// Build the provider this value names.
    pub fn into_provider(self) -> Result<Arc<dyn LlmProvider>> {
        match self {
            Self::ApiKey(key) => Ok(Arc::new(LlmClient::new(LlmClientConfig::anthropic(
                key,
                DEFAULT_MODEL,
            ))?)),
            Self::Config(config) => Ok(Arc::new(LlmClient::new(config)?)),
            Self::Client(client) => Ok(client),
        }
    }
}

impl std::fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ProviderSpec::ApiKey(..)"),
            Self::Config(c) => f
                .debug_tuple("ProviderSpec::Config")
                .field(&c.provider)
                .finish(),
            Self::Client(c) => f
                .debug_tuple("ProviderSpec::Client")
                .field(&c.name())
                .finish(),
        }
    }
}

impl From<LlmClientConfig> for ProviderSpec {
    fn from(config: LlmClientConfig) -> Self {
        Self::Config(config)
    }
}

impl From<Arc<dyn LlmProvider>> for ProviderSpec {
    fn from(client: Arc<dyn LlmProvider>) -> Self {
        Self::Client(client)
    }
}
