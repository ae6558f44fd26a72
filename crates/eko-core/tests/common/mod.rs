//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use eko_core::action::envelope::wrap_input;
use eko_core::tools::RETURN_OUTPUT;
use eko_core::workflow::summary::SUMMARIZE_TOOL;
use eko_core::{
    Action, ActionConfig, ActionType, EkoError, ExecutionContext, HookDecision, LlmParams,
    LlmResponse, Message, Result, Tool, ToolCall, ToolChoice, Workflow, WorkflowCallback,
    WorkflowNode, WorkflowResult,
};
use eko_core::llm::Role;

// ═══════════════════════════════════════════════════════════════════════
//  Scripted model helpers
// ═══════════════════════════════════════════════════════════════════════

/// A tool call wrapped in the envelope the model is asked to produce.
pub fn call(id: &str, tool: &str, input: Value) -> ToolCall {
    ToolCall {
        id: id.to_owned(),
        name: tool.to_owned(),
        arguments: wrap_input("next step", "Working on it", input),
    }
}

pub fn respond(calls: Vec<ToolCall>) -> LlmResponse {
    LlmResponse::tool_calls(calls)
}

/// A `return_output` call.
pub fn return_output(id: &str, successful: bool, value: Value) -> ToolCall {
    call(
        id,
        RETURN_OUTPUT,
        json!({"isSuccessful": successful, "use_tool_result": false, "value": value}),
    )
}

/// The action name from the task prompt of an action request.
pub fn step_of(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .and_then(|m| {
            m.text()
                .lines()
                .find_map(|l| l.strip_prefix("# Step: ").map(str::to_owned))
        })
        .unwrap_or_default()
}

/// Assistant turns already in the transcript.
pub fn rounds_done(messages: &[Message]) -> usize {
    messages.iter().filter(|m| m.role == Role::Assistant).count()
}

pub fn is_summary_request(params: &LlmParams) -> bool {
    params.tool_choice
        == Some(ToolChoice::Tool {
            name: SUMMARIZE_TOOL.into(),
        })
}

pub fn is_finalize_request(params: &LlmParams) -> bool {
    params.tool_choice
        == Some(ToolChoice::Tool {
            name: RETURN_OUTPUT.into(),
        })
}

// ═══════════════════════════════════════════════════════════════════════
//  Tools
// ═══════════════════════════════════════════════════════════════════════

/// Returns its `text` input under `echo`.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text back"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn execute(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value> {
        Ok(json!({"echo": input["text"]}))
    }
}

/// Always fails with `boom`.
pub struct ExplodingTool;

#[async_trait]
impl Tool for ExplodingTool {
    fn name(&self) -> &str {
        "explode"
    }

    fn description(&self) -> &str {
        "Fails"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _ctx: &ExecutionContext, _input: Value) -> Result<Value> {
        Err(EkoError::tool("boom"))
    }
}

/// Takes an hour and ignores cancellation.
pub struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Takes a long time"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _ctx: &ExecutionContext, _input: Value) -> Result<Value> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!("finished"))
    }
}

/// Sleeps for `ms` milliseconds, then reports how long it slept.
pub struct NapTool;

#[async_trait]
impl Tool for NapTool {
    fn name(&self) -> &str {
        "nap"
    }

    fn description(&self) -> &str {
        "Waits a while"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"ms": {"type": "integer"}},
            "required": ["ms"]
        })
    }

    async fn execute(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value> {
        let ms = input["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({"slept_ms": ms}))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Callback
// ═══════════════════════════════════════════════════════════════════════

/// Records lifecycle events and answers `before_subtask` from a table.
#[derive(Default)]
pub struct RecordingCallback {
    pub events: Mutex<Vec<String>>,
    pub decisions: HashMap<String, HookDecision>,
}

impl RecordingCallback {
    pub fn with_decision(mut self, node_id: &str, decision: HookDecision) -> Self {
        self.decisions.insert(node_id.to_owned(), decision);
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl WorkflowCallback for RecordingCallback {
    async fn before_workflow(&self, workflow: &Workflow) {
        self.push(format!("workflow-start:{}", workflow.id));
    }

    async fn after_workflow(&self, workflow: &Workflow, _result: &WorkflowResult) {
        self.push(format!("workflow-end:{}", workflow.id));
    }

    async fn before_subtask(&self, _ctx: &ExecutionContext, node: &WorkflowNode) -> HookDecision {
        self.push(format!("start:{}", node.id));
        self.decisions.get(&node.id).copied().unwrap_or_default()
    }

    async fn after_subtask(&self, _ctx: &ExecutionContext, node: &WorkflowNode, _output: &Value) {
        self.push(format!("end:{}", node.id));
    }

    async fn on_llm_message_user_side_prompt(
        &self,
        _ctx: &ExecutionContext,
        prompt: &str,
        tool_name: &str,
    ) {
        self.push(format!("say:{tool_name}:{prompt}"));
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Builders
// ═══════════════════════════════════════════════════════════════════════

pub fn fast_config() -> ActionConfig {
    ActionConfig {
        retry_delay_ms: 10,
        ..ActionConfig::default()
    }
}

pub fn action(name: &str, tools: Vec<Arc<dyn Tool>>) -> Action {
    Action::new(ActionType::Prompt, name, format!("Do {name}"), tools, fast_config())
}

/// A workflow whose node ids double as action names.
pub fn workflow(
    llm: Arc<dyn eko_core::LlmProvider>,
    nodes: &[(&str, &[&str])],
    tools: Vec<Arc<dyn Tool>>,
) -> Workflow {
    let mut wf = Workflow::new("wf-test", "Test workflow", llm);
    for (id, deps) in nodes {
        let node = WorkflowNode::new(*id, action(id, tools.clone())).with_dependencies(deps.iter().copied());
        wf.add_node(node).unwrap();
    }
    wf
}

/// The task prompt of an action request.
pub fn task_of(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(Message::text)
        .unwrap_or_default()
}
