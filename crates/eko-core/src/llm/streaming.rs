//! SSE stream parser for the Anthropic Messages API.
//!
//! The Anthropic streaming format sends `event:` and `data:` lines in
//! standard SSE format.  [`SseParser`] turns those lines into typed
//! [`StreamEvent`] values and [`StreamAccumulator`] folds the events into a
//! complete [`LlmResponse`], forwarding deltas to a [`StreamHandler`].

use serde_json::Value;

use crate::error::{EkoError, Result};
use crate::llm::provider::StreamHandler;
use crate::llm::types::{ContentBlock, LlmResponse, StreamDelta, StreamEvent, ToolCall, Usage};

/// Parses raw SSE lines from the Anthropic Messages API stream.
///
/// Accumulates partial state across calls because SSE events span multiple
/// lines (`event:` followed by `data:`).
#[derive(Debug, Default)]
pub struct SseParser {
    /// The most recently seen `event:` type.
    current_event_type: Option<String>,
}

impl SseParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single line from the SSE stream.
    ///
    /// Returns `Some(event)` when a complete event has been parsed, `None` for
    /// comment lines, blank lines, or the `event:` prefix line.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<StreamEvent>> {
        let line = line.trim_end();

        if line.starts_with(':') || line.is_empty() {
            return Ok(None);
        }

        if let Some(event_type) = line.strip_prefix("event: ") {
            self.current_event_type = Some(event_type.to_owned());
            return Ok(None);
        }

        if let Some(data) = line.strip_prefix("data: ") {
            let event_type = match self.current_event_type.take() {
                Some(t) => t,
                // Some proxies drop the `event:` line; the payload repeats it.
                None => serde_json::from_str::<Value>(data)
                    .ok()
                    .and_then(|v| v["type"].as_str().map(String::from))
                    .unwrap_or_else(|| "unknown".into()),
            };

            return parse_event(&event_type, data);
        }

        tracing::trace!(line, "ignoring unrecognised SSE line");
        Ok(None)
    }
}

/// Parse an (event_type, data_json) pair into a [`StreamEvent`].
fn parse_event(event_type: &str, data: &str) -> Result<Option<StreamEvent>> {
    match event_type {
        "message_start" => {
            let v = parse_json(data)?;
            let message = &v["message"];
            Ok(Some(StreamEvent::MessageStart {
                message_id: json_string(message, "id"),
                model: json_string(message, "model"),
                input_tokens: message["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            }))
        }

        "content_block_start" => {
            let v = parse_json(data)?;
            let block = &v["content_block"];
            Ok(Some(StreamEvent::ContentBlockStart {
                index: v["index"].as_u64().unwrap_or(0) as u32,
                content_type: json_string(block, "type"),
                id: block["id"].as_str().map(String::from),
                name: block["name"].as_str().map(String::from),
            }))
        }

        "content_block_delta" => {
            let v = parse_json(data)?;
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta_obj = &v["delta"];

            let delta = match json_string(delta_obj, "type").as_str() {
                "text_delta" => StreamDelta::TextDelta(json_string(delta_obj, "text")),
                "input_json_delta" => {
                    StreamDelta::InputJsonDelta(json_string(delta_obj, "partial_json"))
                }
                other => {
                    tracing::debug!(delta_type = other, "skipping unsupported delta type");
                    return Ok(None);
                }
            };

            Ok(Some(StreamEvent::ContentBlockDelta { index, delta }))
        }

        "content_block_stop" => {
            let v = parse_json(data)?;
            Ok(Some(StreamEvent::ContentBlockStop {
                index: v["index"].as_u64().unwrap_or(0) as u32,
            }))
        }

        "message_delta" => {
            let v = parse_json(data)?;
            Ok(Some(StreamEvent::MessageDelta {
                stop_reason: v["delta"]["stop_reason"].as_str().map(String::from),
                output_tokens: v["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
            }))
        }

        "message_stop" => Ok(Some(StreamEvent::MessageStop)),

        "ping" => Ok(Some(StreamEvent::Ping)),

        "error" => {
            let v = parse_json(data)?;
            Err(EkoError::LlmStreamError {
                reason: json_string(&v["error"], "message"),
            })
        }

        _ => {
            if data.trim() == "[DONE]" {
                Ok(Some(StreamEvent::MessageStop))
            } else {
                tracing::trace!(event_type, "ignoring unknown SSE event type");
                Ok(None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// A content block that is still streaming.
#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
    Done(ContentBlock),
}

/// Folds Anthropic streaming events into a complete response.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    /// Blocks keyed by their stream index, in arrival order.
    blocks: Vec<(u32, PartialBlock)>,
    stop_reason: Option<String>,
    usage: Usage,
}

impl StreamAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    fn block_mut(&mut self, index: u32) -> Option<&mut PartialBlock> {
        self.blocks
            .iter_mut()
            .find(|(i, _)| *i == index)
            .map(|(_, b)| b)
    }

    /// Apply a single stream event, forwarding deltas and finished tool
    /// calls to `handler`.
    pub fn apply(
        &mut self,
        event: &StreamEvent,
        handler: &mut (dyn StreamHandler + Send),
    ) -> Result<()> {
        match event {
            StreamEvent::MessageStart { input_tokens, .. } => {
                self.usage.input_tokens = *input_tokens;
            }

            StreamEvent::ContentBlockStart {
                index,
                content_type,
                id,
                name,
            } => {
                let block = match content_type.as_str() {
                    "tool_use" => PartialBlock::ToolUse {
                        id: id.clone().unwrap_or_default(),
                        name: name.clone().unwrap_or_default(),
                        input_json: String::new(),
                    },
                    _ => PartialBlock::Text(String::new()),
                };
                self.blocks.push((*index, block));
            }

            StreamEvent::ContentBlockDelta { index, delta } => {
                match (self.block_mut(*index), delta) {
                    (Some(PartialBlock::Text(text)), StreamDelta::TextDelta(t)) => {
                        text.push_str(t);
                        handler.on_content(t);
                    }
                    (Some(PartialBlock::ToolUse { input_json, .. }), StreamDelta::InputJsonDelta(j)) => {
                        input_json.push_str(j);
                    }
                    (None, StreamDelta::TextDelta(t)) => {
                        self.blocks.push((*index, PartialBlock::Text(t.clone())));
                        handler.on_content(t);
                    }
                    _ => {
                        tracing::debug!(index, "delta does not match its content block");
                    }
                }
            }

            StreamEvent::ContentBlockStop { index } => {
                if let Some(slot) = self.block_mut(*index)
                    && let PartialBlock::ToolUse { .. } = slot
                {
                    let PartialBlock::ToolUse {
                        id,
                        name,
                        input_json,
                    } = std::mem::replace(slot, PartialBlock::Text(String::new()))
                    else {
                        return Ok(());
                    };
                    let input = parse_tool_input(&name, &input_json)?;
                    handler.on_tool_use(&ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: input.clone(),
                    });
                    *slot = PartialBlock::Done(ContentBlock::ToolUse { id, name, input });
                }
            }

            StreamEvent::MessageDelta {
                stop_reason,
                output_tokens,
            } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason.clone();
                }
                self.usage.output_tokens = *output_tokens;
            }

            StreamEvent::MessageStop | StreamEvent::Ping => {}
        }
        Ok(())
    }

    /// Convert the accumulated state into a final [`LlmResponse`].  Tool
    /// blocks that never received a stop event are closed here.
    pub fn into_response(self) -> LlmResponse {
        let blocks = self
            .blocks
            .into_iter()
            .filter_map(|(_, block)| match block {
                PartialBlock::Text(text) if text.is_empty() => None,
                PartialBlock::Text(text) => Some(ContentBlock::Text { text }),
                PartialBlock::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    let input = parse_tool_input(&name, &input_json)
                        .unwrap_or_else(|_| Value::Object(Default::default()));
                    Some(ContentBlock::ToolUse { id, name, input })
                }
                PartialBlock::Done(block) => Some(block),
            })
            .collect();

        let mut response = LlmResponse::from_blocks(blocks, self.stop_reason);
        response.usage = self.usage;
        response
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_tool_input(name: &str, input_json: &str) -> Result<Value> {
    if input_json.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(input_json).map_err(|e| EkoError::LlmParseFailed {
        reason: format!("invalid JSON in tool call `{name}` input: {e}"),
    })
}

/// Parse a JSON string, mapping errors to [`EkoError::LlmParseFailed`].
fn parse_json(data: &str) -> Result<Value> {
    serde_json::from_str(data).map_err(|e| EkoError::LlmParseFailed {
        reason: format!("invalid JSON in SSE data: {e}"),
    })
}

/// Extract a string field from a JSON value, returning an empty string if
/// missing.
fn json_string(v: &Value, field: &str) -> String {
    v[field].as_str().unwrap_or_default().to_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
