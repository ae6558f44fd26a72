//! Core types for LLM interaction.
//!
//! These types model the data flowing between the engine and LLM providers.
//! They are provider-agnostic at this layer; the [`super::client`] module
//! translates them into provider-specific wire formats.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user (or the engine acting for them).
    User,
    /// Output from the LLM.
    Assistant,
    /// Results of tool invocations, fed back to the model.
    Tool,
}

/// A typed piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },

    /// A base64-encoded image.
    Image { media_type: String, data: String },

    /// A tool invocation requested by the assistant.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    /// The outcome of a tool invocation.  `content` holds text and image
    /// blocks only.
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Render this block as text with images replaced by a placeholder, for
    /// logs and summaries.
    pub fn to_display_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Image { media_type, data } => image_placeholder(media_type, data),
            Self::ToolUse { name, input, .. } => format!("[tool_use: {name}({input})]"),
            Self::ToolResult {
                content, is_error, ..
            } => {
                let body = content
                    .iter()
                    .map(ContentBlock::to_display_text)
                    .collect::<Vec<_>>()
                    .join("\n");
                if *is_error {
                    format!("[tool_result (error): {body}]")
                } else {
                    format!("[tool_result: {body}]")
                }
            }
        }
    }
}

/// Textual stand-in for an inline image.
pub fn image_placeholder(media_type: &str, data: &str) -> String {
    // Base64 encodes three bytes in four characters.
    let bytes = data.len() / 4 * 3;
    format!("[image: {media_type}, {bytes} bytes]")
}

/// Message content: either plain text or a sequence of typed blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,

    /// The message body.
    pub content: Content,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Content::Text(content.into()),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(content.into()),
        }
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(content.into()),
        }
    }

    /// Create an assistant message from content blocks (text followed by
    /// tool uses).
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Blocks(blocks),
        }
    }

    /// Create a message carrying tool results.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Tool,
            content: Content::Blocks(results),
        }
    }

    /// The content as a slice of blocks, wrapping plain text on the fly.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match &self.content {
            Content::Text(text) => vec![ContentBlock::text(text.clone())],
            Content::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        match &self.content {
            Content::Text(text) => text.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Tool calls contained in this message.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        match &self.content {
            Content::Text(_) => Vec::new(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: input.clone(),
                    }),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Render the whole message for logs and summaries.
    pub fn to_display_text(&self) -> String {
        match &self.content {
            Content::Text(text) => text.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .map(ContentBlock::to_display_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Return the ids of `tool_use` blocks that are not answered by exactly one
/// later `tool_result` block.  An empty result means the conversation is
/// valid for resubmission.
pub fn unpaired_tool_uses(messages: &[Message]) -> Vec<String> {
    let mut pending: Vec<String> = Vec::new();
    let mut answered: HashMap<String, usize> = HashMap::new();

    for msg in messages {
        let Content::Blocks(blocks) = &msg.content else {
            continue;
        };
        for block in blocks {
            match block {
                ContentBlock::ToolUse { id, .. } => pending.push(id.clone()),
                ContentBlock::ToolResult { tool_use_id, .. } => {
                    if pending.contains(tool_use_id) {
                        *answered.entry(tool_use_id.clone()).or_default() += 1;
                    }
                }
                _ => {}
            }
        }
    }

    pending
        .into_iter()
        .filter(|id| answered.get(id).copied() != Some(1))
        .collect()
}

/// Check that every `tool_use` block is paired with exactly one later
/// `tool_result` block.
pub fn validate_tool_pairing(messages: &[Message]) -> crate::error::Result<()> {
    let unpaired = unpaired_tool_uses(messages);
    if unpaired.is_empty() {
        Ok(())
    } else {
        Err(crate::error::EkoError::Internal(format!(
            "tool calls without exactly one result: {}",
            unpaired.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier assigned by the LLM for correlating results.
    pub id: String,

    /// The name of the tool to invoke.
    pub name: String,

    /// Arguments as a JSON value.  The structure depends on the tool's schema.
    pub arguments: Value,
}

/// A tool definition exposed to the LLM so it knows what tools are available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

/// How the model may choose among the offered tools.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    #[default]
    Auto,
    /// The model must call some tool.
    Any,
    /// The model must call the named tool.
    Tool { name: String },
}

// ---------------------------------------------------------------------------
// Request parameters
// ---------------------------------------------------------------------------

/// Per-call generation parameters.
#[derive(Debug, Clone, Default)]
pub struct LlmParams {
    /// Model identifier.  `None` uses the provider's default.
    pub model: Option<String>,

    /// Maximum tokens the model may generate in this turn.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,

    /// Tool selection constraint.
    pub tool_choice: Option<ToolChoice>,
}

// ---------------------------------------------------------------------------
// LLM response
// ---------------------------------------------------------------------------

/// A complete model response, normalized across vendors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    /// Concatenated text output, if the model produced any.
    pub text_content: Option<String>,

    /// Content blocks in the order the model produced them.
    pub content: Vec<ContentBlock>,

    /// Tool calls extracted from `content`.
    pub tool_calls: Vec<ToolCall>,

    /// Vendor stop reason, normalized to lowercase snake case.
    pub stop_reason: Option<String>,

    /// Token usage, if reported.
    pub usage: Usage,
}

impl LlmResponse {
    /// Build a response from content blocks, deriving the text and tool
    /// call views.
    pub fn from_blocks(content: Vec<ContentBlock>, stop_reason: Option<String>) -> Self {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in &content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(t),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => {}
            }
        }
        Self {
            text_content: (!text.is_empty()).then_some(text),
            content,
            tool_calls,
            stop_reason,
            usage: Usage::default(),
        }
    }

    /// A plain text response.
    pub fn text(text: impl Into<String>) -> Self {
        Self::from_blocks(vec![ContentBlock::text(text)], Some("end_turn".into()))
    }

    /// A response consisting of tool calls only.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        let blocks = calls
            .into_iter()
            .map(|c| ContentBlock::ToolUse {
                id: c.id,
                name: c.name,
                input: c.arguments,
            })
            .collect();
        Self::from_blocks(blocks, Some("tool_use".into()))
    }
}

// ---------------------------------------------------------------------------
// Streaming events
// ---------------------------------------------------------------------------

/// Events emitted during SSE streaming from the Anthropic Messages API.
///
/// These map to the `event:` field in the SSE stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The stream has started.
    MessageStart {
        message_id: String,
        model: String,
        input_tokens: u32,
    },

    /// A new content block has started (`"text"` or `"tool_use"`).
    ContentBlockStart {
        index: u32,
        content_type: String,
        /// For tool_use blocks: the tool call id.
        id: Option<String>,
        /// For tool_use blocks: the tool name.
        name: Option<String>,
    },

    /// An incremental delta within a content block.
    ContentBlockDelta { index: u32, delta: StreamDelta },

    /// A content block has finished streaming.
    ContentBlockStop { index: u32 },

    /// The overall message is complete.
    MessageDelta {
        stop_reason: Option<String>,
        output_tokens: u32,
    },

    /// The stream has fully terminated.
    MessageStop,

    /// A ping / keepalive event (no payload).
    Ping,
}

/// Incremental delta within a streaming content block.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text.
    TextDelta(String),

    /// A chunk of JSON for a tool-use input.
    InputJsonDelta(String),
}

// ---------------------------------------------------------------------------
// Usage tracking
// ---------------------------------------------------------------------------

/// Token usage information returned by the LLM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the input (prompt).
    pub input_tokens: u32,
    /// Number of tokens generated by the model.
    pub output_tokens: u32,
}
