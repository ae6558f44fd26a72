//! The action loop -- drives one node's tool-use conversation with the
//! model until it produces an output.
//!
//! ```text
//!   ┌─────────────┐   ┌────────────┐   ┌──────────────┐
//!   │  compress   │──>│ model call │──>│ run tools    │──┐
//!   │  history    │   │ (retried)  │   │ (unwrapped)  │  │
//!   └─────────────┘   └────────────┘   └──────────────┘  │
//!          ^                                             │
//!          └──────────── until return_output ────────────┘
//! ```
//!
//! A response without tool calls, or an exhausted round budget, triggers
//! exactly one more round in which only `return_output` is offered.
//!
//! The compressed history is carried from round to round and new messages
//! are appended to it, so a summary is reused until the history outgrows
//! the threshold again.  The returned transcript is always the full one.

pub mod envelope;
pub mod prompt;
pub mod results;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{Instrument, debug, info, warn};

use crate::compression::{ContextCompressor, NoCompress};
use crate::config::ActionConfig;
use crate::context::ExecutionContext;
use crate::error::{EkoError, Result};
use crate::llm::{
    ContentBlock, LlmParams, LlmResponse, Message, StreamHandler, ToolCall, ToolChoice,
    ToolDefinition,
};
use crate::tools::builtin::{ReturnedOutput, record_success};
use crate::tools::{RETURN_OUTPUT, ReturnOutputTool, Tool, WriteContextTool, validate_input};
use crate::workflow::NodeInput;

/// How the action's instructions are meant to be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    #[default]
    Prompt,
    Script,
    Hybrid,
}

/// What an action run produced.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// The node output.
    pub output: Value,
    /// The full transcript, uncompressed.
    pub messages: Vec<Message>,
    /// Model rounds used, including a forced finalization round.
    pub rounds: u32,
}

/// Why the loop is in its finalization round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finalize {
    NoToolCall,
    StepBudget,
}

/// A bounded tool-use procedure.
#[derive(Clone)]
pub struct Action {
    pub action_type: ActionType,
    pub name: String,
    pub description: String,
    tools: Vec<Arc<dyn Tool>>,
    config: ActionConfig,
    compressor: Arc<dyn ContextCompressor>,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("action_type", &self.action_type)
            .field("name", &self.name)
            .field("tools", &self.tool_names())
            .field("max_rounds", &self.config.max_rounds)
            .finish()
    }
}

impl Action {
    pub fn new(
        action_type: ActionType,
        name: impl Into<String>,
        description: impl Into<String>,
        tools: Vec<Arc<dyn Tool>>,
        config: ActionConfig,
    ) -> Self {
        Self {
            action_type,
            name: name.into(),
            description: description.into(),
            tools,
            config,
            compressor: Arc::new(NoCompress),
        }
    }

    /// Compress history with `compressor` before each round.
    pub fn with_compressor(mut self, compressor: Arc<dyn ContextCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// The node's own tools, without the injected ones.
    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_owned()).collect()
    }

    pub fn config(&self) -> &ActionConfig {
        &self.config
    }

    /// Run the loop for one node.
    pub async fn execute(
        &self,
        input: &NodeInput,
        ctx: &ExecutionContext,
        output_schema: Option<&Value>,
    ) -> Result<ActionResult> {
        let span = tracing::info_span!("action", node_id = %ctx.node_id, action = %self.name);
        self.run(input, ctx, output_schema).instrument(span).await
    }

    async fn run(
        &self,
        input: &NodeInput,
        ctx: &ExecutionContext,
        output_schema: Option<&Value>,
    ) -> Result<ActionResult> {
        let return_tool: Arc<dyn Tool> =
            Arc::new(ReturnOutputTool::new(&self.name, output_schema.cloned()));

        let mut toolset: Vec<Arc<dyn Tool>> = self
            .tools
            .iter()
            .filter(|t| t.name() != RETURN_OUTPUT && t.name() != crate::tools::WRITE_CONTEXT)
            .cloned()
            .collect();
        toolset.push(Arc::new(WriteContextTool));
        toolset.push(return_tool.clone());

        let tool_map: HashMap<String, Arc<dyn Tool>> = toolset
            .iter()
            .map(|t| (t.name().to_owned(), t.clone()))
            .collect();
        let round_tools = RoundTools {
            all: toolset
                .iter()
                .map(|t| envelope::wrap_definition(t.definition()))
                .collect(),
            finalize: vec![envelope::wrap_definition(return_tool.definition())],
        };

        let mut messages = vec![
            Message::system(prompt::system_prompt(ctx)),
            Message::user(prompt::user_prompt(
                &self.name,
                &self.description,
                input,
                ctx,
                output_schema,
            )),
        ];

        let driven = self
            .drive(ctx, &tool_map, &round_tools, &mut messages)
            .await;

        for tool in &toolset {
            tool.destroy(ctx).await;
        }

        let (returned, last_tool_result, rounds) = driven?;
        let output = match returned {
            Some(r) if r.use_tool_result => match last_tool_result {
                Some(value) => results::strip_images(&value),
                None => {
                    warn!("use_tool_result set but no tool result was recorded");
                    r.value
                }
            },
            Some(r) => r.value,
            None => {
                warn!(rounds, "action finished without return_output, output is null");
                record_success(ctx, false);
                Value::Null
            }
        };

        info!(rounds, "action complete");
        Ok(ActionResult {
            output,
            messages,
            rounds,
        })
    }

    /// The round loop.  Returns what `return_output` recorded (if anything),
    /// the last non-`return_output` tool result, and the rounds used.
    async fn drive(
        &self,
        ctx: &ExecutionContext,
        tool_map: &HashMap<String, Arc<dyn Tool>>,
        round_tools: &RoundTools,
        messages: &mut Vec<Message>,
    ) -> Result<(Option<ReturnedOutput>, Option<Value>, u32)> {
        let mut last_tool_result: Option<Value> = None;
        let mut finalize: Option<Finalize> = None;
        let mut round: u32 = 0;
        // What the model sees: `messages[..covered]` as last compressed.
        let mut history: Vec<Message> = Vec::new();
        let mut covered = 0;

        loop {
            ctx.check_cancelled()?;
            round += 1;
            let finalizing = finalize.is_some();
            history.extend_from_slice(&messages[covered..]);
            covered = messages.len();
            debug!(round, finalizing, history = history.len(), total = covered, "starting round");

            match self.compressor.compress(ctx.llm.as_ref(), &history).await {
                Ok(compressed) => history = compressed,
                Err(e) => warn!(error = %e, "history compression failed, sending it uncompressed"),
            }

            let params = self.round_params(round_tools, finalizing);
            let response = self.call_model(ctx, &history, &params).await?;

            if let Some(message) = assistant_message(&response) {
                messages.push(message);
            }
            if let (Some(text), Some(cb)) = (&response.text_content, &ctx.callback) {
                cb.on_llm_message(ctx, text).await;
            }

            if response.tool_calls.is_empty() {
                if finalizing {
                    warn!(round, "no tool call in the finalization round");
                    return Ok((None, last_tool_result, round));
                }
                info!(round, "model replied without a tool call, forcing finalization");
                messages.push(Message::user(prompt::FINALIZE_NO_TOOL));
                finalize = Some(Finalize::NoToolCall);
                continue;
            }

            let mut tool_results = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let block = self
                    .run_tool_call(ctx, tool_map, call, &mut last_tool_result)
                    .await?;
                tool_results.push(block);
            }
            messages.push(Message::tool_results(tool_results));
            ctx.check_cancelled()?;

            if let Some(returned) = ReturnedOutput::take(ctx, &self.name) {
                return Ok((Some(returned), last_tool_result, round));
            }
            if let Some(reason) = finalize {
                warn!(round, ?reason, "finalization round did not call return_output");
                return Ok((None, last_tool_result, round));
            }
            if round >= self.config.max_rounds {
                info!(round, "round budget spent, forcing finalization");
                messages.push(Message::user(prompt::FINALIZE_STEP_BUDGET));
                finalize = Some(Finalize::StepBudget);
            }
        }
    }

    fn round_params(&self, round_tools: &RoundTools, finalizing: bool) -> LlmParams {
        let (tools, tool_choice) = if finalizing {
            (
                round_tools.finalize.clone(),
                ToolChoice::Tool {
                    name: RETURN_OUTPUT.into(),
                },
            )
        } else {
            (round_tools.all.clone(), ToolChoice::Auto)
        };
        LlmParams {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tools,
            tool_choice: Some(tool_choice),
        }
    }

    /// Stream one model response, retrying transient failures with a fixed
    /// delay.
    async fn call_model(
        &self,
        ctx: &ExecutionContext,
        messages: &[Message],
        params: &LlmParams,
    ) -> Result<LlmResponse> {
        let attempts = self.config.max_retries + 1;
        let mut last_error: Option<EkoError> = None;

        for attempt in 1..=attempts {
            ctx.check_cancelled()?;
            let mut handler = RoundStreamHandler::default();

            let result = tokio::select! {
                biased;
                _ = ctx.cancellation_token().cancelled() => {
                    return Err(EkoError::aborted(format!("node `{}` cancelled during model call", ctx.node_id)));
                }
                r = ctx.llm.generate_stream(messages, params, &mut handler) => r,
            };

            match result {
                Ok(response) => {
                    debug!(
                        attempt,
                        streamed_chars = handler.chars,
                        tool_calls = response.tool_calls.len(),
                        stop_reason = ?response.stop_reason,
                        "model responded"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, attempts, error = %e, "model call failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::select! {
                            biased;
                            _ = ctx.cancellation_token().cancelled() => {
                                return Err(EkoError::aborted(format!("node `{}` cancelled during retry back-off", ctx.node_id)));
                            }
                            _ = tokio::time::sleep(self.config.retry_delay()) => {}
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(EkoError::RetriesExhausted {
            attempts,
            reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Run one tool call and build its `tool_result` block.  Only
    /// cancellation escapes as an error; every other failure is reported to
    /// the model.
    async fn run_tool_call(
        &self,
        ctx: &ExecutionContext,
        tool_map: &HashMap<String, Arc<dyn Tool>>,
        call: &ToolCall,
        last_tool_result: &mut Option<Value>,
    ) -> Result<ContentBlock> {
        let unwrapped = envelope::unwrap_input(call.arguments.clone());
        if let Some(cb) = &ctx.callback {
            if let Some(thinking) = &unwrapped.thinking {
                cb.on_llm_message(ctx, thinking).await;
            }
            if let Some(prompt) = &unwrapped.user_side_prompt {
                cb.on_llm_message_user_side_prompt(ctx, prompt, &call.name).await;
            }
        }

        let outcome = self.invoke(ctx, tool_map, &call.name, unwrapped.input).await;

        let (content, is_error) = match outcome {
            Ok(value) => {
                let value = match &ctx.callback {
                    Some(cb) => cb.after_tool_use(ctx, &call.name, value).await,
                    None => value,
                };
                if let (Some(dir), Some(image)) =
                    (&self.config.debug_image_dir, results::detect_image(&value))
                {
                    match results::persist_image(dir, &ctx.node_id, &image).await {
                        Ok(path) => debug!(path = %path.display(), "tool image saved"),
                        Err(e) => warn!(error = %e, "failed to save tool image"),
                    }
                }
                debug!(tool = %call.name, result = %truncate(&results::strip_images(&value).to_string(), 200), "tool succeeded");
                let blocks = results::result_blocks(&value);
                if call.name != RETURN_OUTPUT {
                    *last_tool_result = Some(value);
                }
                (blocks, false)
            }
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool call failed");
                (results::error_blocks(&e), true)
            }
        };

        Ok(ContentBlock::ToolResult {
            tool_use_id: call.id.clone(),
            content,
            is_error,
        })
    }

    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        tool_map: &HashMap<String, Arc<dyn Tool>>,
        name: &str,
        input: Value,
    ) -> Result<Value> {
        let tool = tool_map
            .get(name)
            .cloned()
            .ok_or_else(|| EkoError::ToolNotFound {
                tool_name: name.to_owned(),
            })?;

        let input = match &ctx.callback {
            Some(cb) => cb.before_tool_use(ctx, name, input).await,
            None => input,
        };
        validate_input(tool.as_ref(), &input)?;

        info!(tool = name, "running tool");
        tokio::select! {
            biased;
            _ = ctx.cancellation_token().cancelled() => {
                Err(EkoError::aborted(format!("node `{}` cancelled during tool `{name}`", ctx.node_id)))
            }
            r = tool.execute(ctx, input) => r,
        }
    }
}

/// Tool definitions offered in normal and finalization rounds.
struct RoundTools {
    all: Vec<ToolDefinition>,
    finalize: Vec<ToolDefinition>,
}

/// The assistant turn for `response`: text first, then tool uses.
fn assistant_message(response: &LlmResponse) -> Option<Message> {
    let mut blocks = Vec::with_capacity(response.tool_calls.len() + 1);
    if let Some(text) = response.text_content.as_ref().filter(|t| !t.is_empty()) {
        blocks.push(ContentBlock::text(text.clone()));
    }
    blocks.extend(response.tool_calls.iter().map(|c| ContentBlock::ToolUse {
        id: c.id.clone(),
        name: c.name.clone(),
        input: c.arguments.clone(),
    }));
    (!blocks.is_empty()).then(|| Message::assistant_blocks(blocks))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Tracks streaming progress of one model call.
#[derive(Debug, Default)]
struct RoundStreamHandler {
    chars: usize,
}

impl StreamHandler for RoundStreamHandler {
    fn on_content(&mut self, delta: &str) {
        self.chars += delta.chars().count();
    }

    fn on_tool_use(&mut self, call: &ToolCall) {
        tracing::trace!(tool = %call.name, id = %call.id, "tool call streamed");
    }

    fn on_error(&mut self, error: &EkoError) {
        tracing::debug!(error = %error, "stream failed");
    }
}
