//! LLM integration layer.
//!
//! - [`types`] -- Core data types (messages, content blocks, tool calls, streaming events).
//! - [`provider`] -- The [`LlmProvider`] capability and provider construction.
//! - [`client`] -- HTTP client for Anthropic and OpenAI APIs.
//! - [`streaming`] -- SSE stream parser for Anthropic incremental responses.
//! - [`streaming_openai`] -- SSE stream parser for OpenAI incremental responses.
//! - [`scripted`] -- Deterministic provider for tests and offline runs.

pub mod client;
pub mod provider;
pub mod scripted;
pub mod streaming;
pub mod streaming_openai;
pub mod types;

pub use client::{LlmClient, LlmClientConfig, Vendor};
pub use provider::{DEFAULT_MODEL, LlmProvider, NoopHandler, ProviderSpec, StreamHandler};
pub use scripted::{RecordedRequest, ScriptedProvider};
pub use types::{
    Content, ContentBlock, LlmParams, LlmResponse, Message, Role, StreamEvent, ToolCall,
    ToolChoice, ToolDefinition, Usage, validate_tool_pairing,
};
