//! Multi-vendor LLM client.
//!
//! Supports the **Anthropic Messages API** and the **OpenAI Chat Completions
//! API** (including OpenAI-compatible endpoints such as Ollama, Together, and
//! vLLM) with both streaming SSE and non-streaming modes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::{EkoError, Result};
use crate::llm::provider::{LlmProvider, StreamHandler};
use crate::llm::streaming::{SseParser, StreamAccumulator};
use crate::llm::streaming_openai::OpenAiStreamAccumulator;
use crate::llm::types::{
    Content, ContentBlock, LlmParams, LlmResponse, Message, Role, StreamEvent, ToolChoice,
    ToolDefinition, Usage,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default Anthropic API base URL.
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Default OpenAI API base URL.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Vendor enum
// ---------------------------------------------------------------------------

/// Identifies which wire protocol the client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI Chat Completions API (also covers OpenAI-compatible endpoints).
    OpenAI,
}

impl Vendor {
    fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
        }
    }
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to a single LLM endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Which wire protocol this configuration targets.
    pub provider: Vendor,
    /// API key for authentication.
    pub api_key: String,
    /// Base URL for the API (e.g. `https://api.anthropic.com`).
    pub base_url: String,
    /// Default model identifier.
    pub default_model: String,
    /// Default maximum tokens per response.
    pub max_tokens: u32,
    /// HTTP timeout for a single request.
    pub timeout_secs: u64,
}

impl LlmClientConfig {
    /// Create a configuration for the Anthropic Claude API.
    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: Vendor::Anthropic,
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_owned(),
            default_model: model.into(),
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }

    /// Create a configuration for the OpenAI API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: Vendor::OpenAI,
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_owned(),
            default_model: model.into(),
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }

    /// Create a configuration for any OpenAI-compatible API (e.g. Ollama,
    /// Together, vLLM).
    pub fn openai_compatible(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::openai(api_key, model)
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// An LLM client that communicates with either the Anthropic Messages API or
/// the OpenAI Chat Completions API.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client with the given configuration.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(EkoError::MissingApiKey {
                provider: config.provider.as_str().into(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EkoError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    /// Returns the wire protocol in use.
    pub fn vendor(&self) -> Vendor {
        self.config.provider
    }

    fn model_for<'a>(&'a self, params: &'a LlmParams) -> &'a str {
        match params.model.as_deref() {
            Some(m) if !m.is_empty() => m,
            _ => &self.config.default_model,
        }
    }

    // =======================================================================
    // Anthropic implementation
    // =======================================================================

    /// Build the JSON body for the Anthropic Messages API.
    fn build_anthropic_request_body(
        &self,
        messages: &[Message],
        params: &LlmParams,
        stream: bool,
    ) -> Value {
        let (system_text, wire_messages) = messages_to_anthropic(messages);

        let mut body = json!({
            "model": self.model_for(params),
            "max_tokens": params.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": wire_messages,
        });

        if let Some(system) = system_text {
            body["system"] = json!(system);
        }
        if let Some(temp) = params.temperature {
            body["temperature"] = json!(temp);
        }
        if !params.tools.is_empty() {
            body["tools"] = tools_to_anthropic(&params.tools);
            if let Some(choice) = &params.tool_choice {
                body["tool_choice"] = tool_choice_to_anthropic(choice);
            }
        }
        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    /// Send the HTTP request to the Anthropic Messages API endpoint.
    async fn send_anthropic_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.base_url);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| {
                EkoError::LlmRequestFailed {
                    reason: format!("invalid API key header: {e}"),
                }
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(url = %url, model = %body["model"], provider = "anthropic", "sending LLM request");

        let resp = self.http.post(&url).headers(headers).json(body).send().await?;
        check_status(resp).await
    }

    async fn anthropic_text(&self, messages: &[Message], params: &LlmParams) -> Result<LlmResponse> {
        let body = self.build_anthropic_request_body(messages, params, false);
        let resp = self.send_anthropic_request(&body).await?;
        let v = read_json(resp).await?;
        parse_anthropic_response(&v)
    }

    async fn anthropic_stream(
        &self,
        messages: &[Message],
        params: &LlmParams,
        handler: &mut (dyn StreamHandler + Send),
    ) -> Result<LlmResponse> {
        let body = self.build_anthropic_request_body(messages, params, true);
        let resp = self.send_anthropic_request(&body).await?;
        handler.on_start();

        let mut parser = SseParser::new();
        let mut accumulator = StreamAccumulator::new();
        let mut byte_stream = resp.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(|e| EkoError::LlmStreamError {
                reason: format!("stream read error: {e}"),
            })?;
            lines.push(&chunk);

            while let Some(line) = lines.next_line()? {
                if let Some(event) = parser.parse_line(&line)? {
                    accumulator.apply(&event, handler)?;
                    if matches!(event, StreamEvent::MessageStop) {
                        return Ok(accumulator.into_response());
                    }
                }
            }
        }

        Ok(accumulator.into_response())
    }

    // =======================================================================
    // OpenAI implementation
    // =======================================================================

    /// Build the JSON body for the OpenAI Chat Completions API.
    fn build_openai_request_body(
        &self,
        messages: &[Message],
        params: &LlmParams,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": self.model_for(params),
            "max_tokens": params.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages_to_openai(messages),
        });

        if let Some(temp) = params.temperature {
            body["temperature"] = json!(temp);
        }
        if !params.tools.is_empty() {
            body["tools"] = tools_to_openai(&params.tools);
            if let Some(choice) = &params.tool_choice {
                body["tool_choice"] = tool_choice_to_openai(choice);
            }
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }

        body
    }

    /// Send the HTTP request to the OpenAI Chat Completions API endpoint.
    async fn send_openai_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| EkoError::LlmRequestFailed {
                reason: format!("invalid authorization header: {e}"),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(url = %url, model = %body["model"], provider = "openai", "sending LLM request");

        let resp = self.http.post(&url).headers(headers).json(body).send().await?;
        check_status(resp).await
    }

    async fn openai_text(&self, messages: &[Message], params: &LlmParams) -> Result<LlmResponse> {
        let body = self.build_openai_request_body(messages, params, false);
        let resp = self.send_openai_request(&body).await?;
        let v = read_json(resp).await?;
        parse_openai_response(&v)
    }

    async fn openai_stream(
        &self,
        messages: &[Message],
        params: &LlmParams,
        handler: &mut (dyn StreamHandler + Send),
    ) -> Result<LlmResponse> {
        let body = self.build_openai_request_body(messages, params, true);
        let resp = self.send_openai_request(&body).await?;
        handler.on_start();

        let mut accumulator = OpenAiStreamAccumulator::new();
        let mut byte_stream = resp.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(|e| EkoError::LlmStreamError {
                reason: format!("stream read error: {e}"),
            })?;
            lines.push(&chunk);

            while let Some(line) = lines.next_line()? {
                if let Some(delta_text) = accumulator.feed_line(&line)? {
                    handler.on_content(&delta_text);
                }
                if accumulator.is_done() {
                    break;
                }
            }
            if accumulator.is_done() {
                break;
            }
        }

        let response = accumulator.into_response()?;
        for call in &response.tool_calls {
            handler.on_tool_use(call);
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    fn name(&self) -> &str {
        self.config.provider.as_str()
    }

    async fn generate_text(
        &self,
        messages: &[Message],
        params: &LlmParams,
    ) -> Result<LlmResponse> {
        match self.config.provider {
            Vendor::Anthropic => self.anthropic_text(messages, params).await,
            Vendor::OpenAI => self.openai_text(messages, params).await,
        }
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        params: &LlmParams,
        handler: &mut (dyn StreamHandler + Send),
    ) -> Result<LlmResponse> {
        let result = match self.config.provider {
            Vendor::Anthropic => self.anthropic_stream(messages, params, handler).await,
            Vendor::OpenAI => self.openai_stream(messages, params, handler).await,
        };
        match &result {
            Ok(response) => handler.on_complete(response),
            Err(e) => handler.on_error(e),
        }
        result
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Splits a byte stream into lines.  Bytes are only decoded once a whole
/// line has arrived, so a character split across two chunks survives.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// The next complete line, newline included.
    fn next_line(&mut self) -> Result<Option<String>> {
        let Some(pos) = self.pending.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let line: Vec<u8> = self.pending.drain(..=pos).collect();
        String::from_utf8(line)
            .map(Some)
            .map_err(|e| EkoError::LlmStreamError {
                reason: format!("stream line is not valid UTF-8: {e}"),
            })
    }
}

/// Turn a non-2xx response into an error carrying the response body.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(EkoError::LlmRequestFailed {
        reason: format!("API returned {status}: {text}"),
    })
}

async fn read_json(resp: reqwest::Response) -> Result<Value> {
    let text = resp.text().await.map_err(|e| EkoError::LlmRequestFailed {
        reason: format!("failed to read response body: {e}"),
    })?;
    serde_json::from_str(&text).map_err(|e| EkoError::LlmParseFailed {
        reason: format!("invalid JSON response: {e}"),
    })
}

// ===========================================================================
// Anthropic format conversion (free functions)
// ===========================================================================

/// Split the system messages out (Anthropic expects them as a top-level
/// field) and convert the rest to the Anthropic wire format.  Consecutive
/// messages that map to the same wire role are merged, since the API
/// requires alternating turns.
fn messages_to_anthropic(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        let role = match msg.role {
            Role::System => {
                let text = msg.text();
                match &mut system {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(&text);
                    }
                    None => system = Some(text),
                }
                continue;
            }
            Role::User | Role::Tool => "user",
            Role::Assistant => "assistant",
        };

        let blocks: Vec<Value> = msg.blocks().iter().map(block_to_anthropic).collect();

        match wire_messages.last_mut() {
            Some(last) if last["role"] == role => {
                if let Some(content) = last["content"].as_array_mut() {
                    content.extend(blocks);
                }
            }
            _ => wire_messages.push(json!({ "role": role, "content": blocks })),
        }
    }

    (system, wire_messages)
}

fn block_to_anthropic(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::Image { media_type, data } => json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }),
        ContentBlock::ToolUse { id, name, input } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let mut v = json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content.iter().map(block_to_anthropic).collect::<Vec<_>>(),
            });
            if *is_error {
                v["is_error"] = json!(true);
            }
            v
        }
    }
}

/// Convert tool definitions into the Anthropic API format.
fn tools_to_anthropic(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect();
    json!(tool_values)
}

fn tool_choice_to_anthropic(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::Any => json!({"type": "any"}),
        ToolChoice::Tool { name } => json!({"type": "tool", "name": name}),
    }
}

/// Parse a non-streaming Anthropic Messages API response.
fn parse_anthropic_response(v: &Value) -> Result<LlmResponse> {
    let content = v["content"]
        .as_array()
        .ok_or_else(|| EkoError::LlmParseFailed {
            reason: "missing `content` array in response".into(),
        })?;

    let mut blocks = Vec::with_capacity(content.len());
    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(t) = block["text"].as_str() {
                    blocks.push(ContentBlock::text(t));
                }
            }
            Some("tool_use") => blocks.push(ContentBlock::ToolUse {
                id: block["id"].as_str().unwrap_or_default().to_owned(),
                name: block["name"].as_str().unwrap_or_default().to_owned(),
                input: block["input"].clone(),
            }),
            _ => {}
        }
    }

    let mut response =
        LlmResponse::from_blocks(blocks, v["stop_reason"].as_str().map(String::from));
    response.usage = Usage {
        input_tokens: v["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: v["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
    };
    Ok(response)
}

// ===========================================================================
// OpenAI format conversion (free functions)
// ===========================================================================

/// Convert internal messages to the OpenAI Chat Completions wire format.
///
/// Tool results become one `role: "tool"` message per call.  OpenAI tool
/// messages carry text only, so images returned by tools are forwarded in
/// a follow-up user message.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        match (msg.role, &msg.content) {
            (Role::System, _) => {
                wire_messages.push(json!({"role": "system", "content": msg.text()}));
            }
            (Role::User, Content::Text(text)) => {
                wire_messages.push(json!({"role": "user", "content": text}));
            }
            (Role::User, Content::Blocks(blocks)) => {
                let parts: Vec<Value> = blocks.iter().filter_map(block_to_openai_part).collect();
                wire_messages.push(json!({"role": "user", "content": parts}));
            }
            (Role::Assistant, _) => {
                let tool_calls: Vec<Value> = msg
                    .tool_calls()
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();

                let text = msg.text();
                let mut m = json!({"role": "assistant"});
                if !text.is_empty() || tool_calls.is_empty() {
                    m["content"] = json!(text);
                }
                if !tool_calls.is_empty() {
                    m["tool_calls"] = json!(tool_calls);
                }
                wire_messages.push(m);
            }
            (Role::Tool, _) => {
                let mut images: Vec<Value> = Vec::new();
                for block in msg.blocks() {
                    let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = block
                    else {
                        continue;
                    };
                    let mut text = String::new();
                    for part in &content {
                        match part {
                            ContentBlock::Text { text: t } => text.push_str(t),
                            ContentBlock::Image { .. } => {
                                text.push_str(&part.to_display_text());
                                images.extend(block_to_openai_part(part));
                            }
                            _ => {}
                        }
                    }
                    wire_messages.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": text,
                    }));
                }
                if !images.is_empty() {
                    let mut parts = vec![json!({"type": "text", "text": "Images returned by the tool calls above:"})];
                    parts.extend(images);
                    wire_messages.push(json!({"role": "user", "content": parts}));
                }
            }
        }
    }

    wire_messages
}

fn block_to_openai_part(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
        ContentBlock::Image { media_type, data } => Some(json!({
            "type": "image_url",
            "image_url": {"url": format!("data:{media_type};base64,{data}")},
        })),
        _ => None,
    }
}

/// Convert tool definitions into the OpenAI Chat Completions API format.
///
/// OpenAI wraps each tool in `{"type": "function", "function": {...}}`.
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();
    json!(tool_values)
}

fn tool_choice_to_openai(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Any => json!("required"),
        ToolChoice::Tool { name } => json!({"type": "function", "function": {"name": name}}),
    }
}

/// Map an OpenAI `finish_reason` onto the Anthropic-style vocabulary used
/// throughout the engine.
pub(crate) fn normalize_finish_reason(reason: &str) -> String {
    match reason {
        "stop" => "end_turn".into(),
        "tool_calls" | "function_call" => "tool_use".into(),
        "length" => "max_tokens".into(),
        other => other.into(),
    }
}

/// Parse a non-streaming OpenAI Chat Completions API response.
pub fn parse_openai_response(v: &Value) -> Result<LlmResponse> {
    let message = &v["choices"][0]["message"];

    if message.is_null() {
        return Err(EkoError::LlmParseFailed {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    let mut blocks = Vec::new();
    if let Some(content) = message["content"].as_str()
        && !content.is_empty()
    {
        blocks.push(ContentBlock::text(content));
    }

    if let Some(tool_calls_arr) = message["tool_calls"].as_array() {
        for tc in tool_calls_arr {
            let func = &tc["function"];
            let name = func["name"].as_str().unwrap_or_default().to_owned();
            let args_str = func["arguments"].as_str().unwrap_or("{}");
            let input: Value =
                serde_json::from_str(args_str).map_err(|e| EkoError::LlmParseFailed {
                    reason: format!("invalid JSON in OpenAI tool call `{name}` arguments: {e}"),
                })?;
            blocks.push(ContentBlock::ToolUse {
                id: tc["id"].as_str().unwrap_or_default().to_owned(),
                name,
                input,
            });
        }
    }

    let stop_reason = v["choices"][0]["finish_reason"]
        .as_str()
        .map(normalize_finish_reason);
    let mut response = LlmResponse::from_blocks(blocks, stop_reason);
    response.usage = Usage {
        input_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: v["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    };
    Ok(response)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
