//! Hooks the caller can attach to a workflow run.
//!
//! Every method has a default so implementors override only what they need.
//! The human-input hooks are paired with [`WorkflowCallback::supports_human_input`]:
//! the matching human tools are only offered to the model when it returns
//! `true`.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::workflow::{Workflow, WorkflowNode, WorkflowResult};

/// What to do with a node after `before_subtask` ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookDecision {
    /// Run the node normally.
    #[default]
    Continue,
    /// Do not run the node; its output is `null`.
    Skip,
    /// Cancel the whole workflow.
    AbortAll,
}

/// The kinds of human interaction a caller can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HumanInputKind {
    Text,
    SingleChoice,
    MultipleChoice,
    Operate,
}

impl HumanInputKind {
    pub const ALL: [HumanInputKind; 4] = [
        Self::Text,
        Self::SingleChoice,
        Self::MultipleChoice,
        Self::Operate,
    ];
}

#[async_trait]
pub trait WorkflowCallback: Send + Sync {
    async fn before_workflow(&self, _workflow: &Workflow) {}

    async fn after_workflow(&self, _workflow: &Workflow, _result: &WorkflowResult) {}

    /// Runs before a node's action, once all dependencies finished.
    async fn before_subtask(&self, _ctx: &ExecutionContext, _node: &WorkflowNode) -> HookDecision {
        HookDecision::Continue
    }

    async fn after_subtask(&self, _ctx: &ExecutionContext, _node: &WorkflowNode, _output: &Value) {}

    /// May rewrite the tool input before execution.
    async fn before_tool_use(&self, _ctx: &ExecutionContext, _tool_name: &str, input: Value) -> Value {
        input
    }

    /// May rewrite the tool result before it is shown to the model.
    async fn after_tool_use(&self, _ctx: &ExecutionContext, _tool_name: &str, result: Value) -> Value {
        result
    }

    /// Model reasoning text (assistant text and the `thinking` envelope field).
    async fn on_llm_message(&self, _ctx: &ExecutionContext, _text: &str) {}

    /// The user-facing description of the tool call about to run.
    async fn on_llm_message_user_side_prompt(
        &self,
        _ctx: &ExecutionContext,
        _prompt: &str,
        _tool_name: &str,
    ) {
    }

    /// Whether this callback answers the given kind of human request.
    fn supports_human_input(&self, _kind: HumanInputKind) -> bool {
        false
    }

    async fn on_human_input_text(&self, _ctx: &ExecutionContext, _question: &str) -> Option<String> {
        None
    }

    async fn on_human_input_single_choice(
        &self,
        _ctx: &ExecutionContext,
        _question: &str,
        _choices: &[String],
    ) -> Option<String> {
        None
    }

    async fn on_human_input_multiple_choice(
        &self,
        _ctx: &ExecutionContext,
        _question: &str,
        _choices: &[String],
    ) -> Option<Vec<String>> {
        None
    }

    /// Ask a human to operate on the user's behalf (e.g. log in).  Returns
    /// a description of what they did.
    async fn on_human_operate(&self, _ctx: &ExecutionContext, _reason: &str) -> Option<String> {
        None
    }
}
