//! SSE stream parser for the OpenAI Chat Completions API.
//!
//! The OpenAI streaming format sends `data:` lines with JSON payloads
//! containing `choices[].delta` objects and terminates with a
//! `data: [DONE]` sentinel.

use serde_json::Value;

use crate::error::{EkoError, Result};
use crate::llm::client::normalize_finish_reason;
use crate::llm::types::{ContentBlock, LlmResponse, Usage};

// ---------------------------------------------------------------------------
// Stream accumulator
// ---------------------------------------------------------------------------

/// Accumulates fragments from an OpenAI SSE stream into a complete response.
///
/// Tool call deltas arrive split across chunks: the id and function name
/// usually come first, argument fragments follow.  Chunks are correlated
/// by their `index`.
#[derive(Debug, Default)]
pub struct OpenAiStreamAccumulator {
    text: String,
    tool_call_builders: Vec<OpenAiToolCallBuilder>,
    finish_reason: Option<String>,
    done: bool,
    usage: Usage,
}

#[derive(Debug, Default)]
struct OpenAiToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl OpenAiStreamAccumulator {
    /// Create a new empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the `[DONE]` sentinel has been received.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a single SSE line.  Returns the text delta it carried, if any.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<String>> {
        let line = line.trim_end();

        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let v: Value = serde_json::from_str(data).map_err(|e| EkoError::LlmParseFailed {
            reason: format!("invalid JSON in OpenAI SSE data: {e}"),
        })?;

        if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
            return Err(EkoError::LlmStreamError {
                reason: err["message"].as_str().unwrap_or("stream error").to_owned(),
            });
        }

        if let Some(usage_obj) = v.get("usage").filter(|u| !u.is_null()) {
            if let Some(input) = usage_obj["prompt_tokens"].as_u64() {
                self.usage.input_tokens = input as u32;
            }
            if let Some(output) = usage_obj["completion_tokens"].as_u64() {
                self.usage.output_tokens = output as u32;
            }
        }

        let choice = &v["choices"][0];
        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(normalize_finish_reason(reason));
        }

        let delta = &choice["delta"];
        if delta.is_null() {
            return Ok(None);
        }

        let mut text_delta: Option<String> = None;
        if let Some(content) = delta["content"].as_str()
            && !content.is_empty()
        {
            self.text.push_str(content);
            text_delta = Some(content.to_owned());
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as usize;

                while self.tool_call_builders.len() <= index {
                    self.tool_call_builders
                        .push(OpenAiToolCallBuilder::default());
                }

                let builder = &mut self.tool_call_builders[index];
                if let Some(id) = tc["id"].as_str() {
                    builder.id = id.to_owned();
                }
                let func = &tc["function"];
                if let Some(name) = func["name"].as_str() {
                    builder.name.push_str(name);
                }
                if let Some(args) = func["arguments"].as_str() {
                    builder.arguments.push_str(args);
                }
            }
        }

        Ok(text_delta)
    }

    /// Consume the accumulator and produce the final [`LlmResponse`].  Text
    /// precedes tool calls in the resulting content.
    pub fn into_response(self) -> Result<LlmResponse> {
        let mut blocks = Vec::with_capacity(self.tool_call_builders.len() + 1);
        if !self.text.is_empty() {
            blocks.push(ContentBlock::text(self.text));
        }

        for b in self.tool_call_builders {
            let input: Value = if b.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&b.arguments).map_err(|e| EkoError::LlmParseFailed {
                    reason: format!(
                        "invalid JSON in OpenAI tool call `{}` arguments: {e}",
                        b.name
                    ),
                })?
            };
            blocks.push(ContentBlock::ToolUse {
                id: b.id,
                name: b.name,
                input,
            });
        }

        let mut response = LlmResponse::from_blocks(blocks, self.finish_reason);
        response.usage = self.usage;
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
