//! Context compression -- shrink an action's accumulated history before it
//! is resubmitted to the model.
//!
//! [`SummaryCompress`] works as follows once the transcript grows past the
//! threshold:
//!
//! 1. Keeps the leading system and user (task) messages verbatim.
//! 2. Keeps the tail starting at the most recent assistant turn, so the
//!    live `tool_use`/`tool_result` pair is never split.
//! 3. Asks the model for a numbered-step summary of everything in between.
//! 4. Returns `[task..., summary, tail...]`.
//!
//! A summary produced earlier sits in the middle of the next transcript, so
//! compressing again folds it into the new summary.
//!
//! Compressors never modify the caller's slice.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::CompressionConfig;
use crate::error::{EkoError, Result};
use crate::llm::{LlmParams, LlmProvider, Message, Role};

/// Opens the synthesized summary message.
pub const SUMMARY_START: &str = "<compressed_history>";
/// Closes the synthesized summary message.
pub const SUMMARY_END: &str = "</compressed_history>";

const SUMMARY_SYSTEM_PROMPT: &str = "You compress the working history of an automation agent. \
The agent will continue the task from your summary alone, so nothing it needs may be lost.";

const SUMMARY_TEMPLATE: &str = "Summarize the history below as numbered steps, in chronological order.

Rules:
- One step per assistant action. State which tool was called with which arguments.
- Copy every tool result VERBATIM into the step that produced it. Do not shorten, paraphrase or omit outputs.
- Record every value the agent wrote to the context and every decision it made.
- Do not add commentary, advice or anything that did not happen.

Format:
Step 1: <action>
Result: <verbatim tool output>
Step 2: ...

History:
";

/// Turns a transcript into a (possibly shorter) transcript.
#[async_trait]
pub trait ContextCompressor: Send + Sync {
    async fn compress(&self, llm: &dyn LlmProvider, messages: &[Message]) -> Result<Vec<Message>>;
}

/// Check whether a transcript is long enough to compress.
pub fn needs_compression(messages: &[Message], threshold: usize) -> bool {
    messages.len() > threshold
}

/// The compressor matching `config`.
pub fn from_config(config: &CompressionConfig) -> std::sync::Arc<dyn ContextCompressor> {
    if config.enabled {
        std::sync::Arc::new(SummaryCompress::new(config.threshold, config.max_tokens))
    } else {
        std::sync::Arc::new(NoCompress)
    }
}

// ---------------------------------------------------------------------------
// NoCompress
// ---------------------------------------------------------------------------

/// Identity transform.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCompress;

#[async_trait]
impl ContextCompressor for NoCompress {
    async fn compress(&self, _llm: &dyn LlmProvider, messages: &[Message]) -> Result<Vec<Message>> {
        Ok(messages.to_vec())
    }
}

// ---------------------------------------------------------------------------
// SummaryCompress
// ---------------------------------------------------------------------------

/// Summarizes the middle of long transcripts through one model call.
#[derive(Debug, Clone)]
pub struct SummaryCompress {
    threshold: usize,
    max_tokens: u32,
    model: Option<String>,
}

impl Default for SummaryCompress {
    fn default() -> Self {
        let config = CompressionConfig::default();
        Self::new(config.threshold, config.max_tokens)
    }
}

impl SummaryCompress {
    pub fn new(threshold: usize, max_tokens: u32) -> Self {
        Self {
            threshold,
            max_tokens,
            model: None,
        }
    }

    /// Use a specific model for the summary call.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Indices splitting `messages` into `[..head]`, `[head..tail]`, `[tail..]`.
fn split_points(messages: &[Message]) -> (usize, usize) {
    let head = messages
        .iter()
        .take_while(|m| matches!(m.role, Role::System | Role::User))
        .count();

    // Keep the final two messages, extended back so tool results are never
    // separated from the assistant turn that requested them.
    let mut tail = messages.len().saturating_sub(2).max(head);
    while tail > head && messages[tail].role == Role::Tool {
        tail -= 1;
    }
    (head, tail)
}

/// Render messages for the summary prompt.  Images appear as placeholders.
fn format_messages_for_summary(messages: &[Message]) -> String {
    let mut buf = String::with_capacity(messages.len() * 200);
    for msg in messages {
        let role_label = match msg.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        };
        buf.push_str(role_label);
        buf.push_str(": ");
        buf.push_str(&msg.to_display_text());
        buf.push('\n');
    }
    buf
}

#[async_trait]
impl ContextCompressor for SummaryCompress {
    async fn compress(&self, llm: &dyn LlmProvider, messages: &[Message]) -> Result<Vec<Message>> {
        if !needs_compression(messages, self.threshold) {
            return Ok(messages.to_vec());
        }

        let (head, tail) = split_points(messages);
        if tail <= head {
            debug!(total = messages.len(), "nothing between task and recent turns, not compressing");
            return Ok(messages.to_vec());
        }

        let middle = &messages[head..tail];
        info!(
            total = messages.len(),
            summarized = middle.len(),
            kept = messages.len() - middle.len(),
            "compressing action history"
        );

        let prompt = format!("{SUMMARY_TEMPLATE}{}", format_messages_for_summary(middle));
        let params = LlmParams {
            model: self.model.clone(),
            max_tokens: Some(self.max_tokens),
            temperature: Some(0.0),
            ..LlmParams::default()
        };
        let response = llm
            .generate_text(
                &[Message::system(SUMMARY_SYSTEM_PROMPT), Message::user(prompt)],
                &params,
            )
            .await?;

        let summary = response
            .text_content
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| EkoError::LlmParseFailed {
                reason: "summary response contained no text".into(),
            })?;

        let mut compressed = Vec::with_capacity(head + 1 + messages.len() - tail);
        compressed.extend_from_slice(&messages[..head]);
        compressed.push(Message::assistant(format!(
            "{SUMMARY_START}\n{}\n{SUMMARY_END}",
            summary.trim()
        )));
        compressed.extend_from_slice(&messages[tail..]);

        debug!(original = messages.len(), compressed = compressed.len(), "compression complete");
        Ok(compressed)
    }
}
