//! Human-interaction tools.
//!
//! Each tool forwards to the matching [`WorkflowCallback`] hook.  They are
//! only offered when the callback reports support for their kind.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::callback::{HumanInputKind, WorkflowCallback};
use crate::context::ExecutionContext;
use crate::error::{EkoError, Result};
use crate::tools::Tool;

/// A tool answering through one of the callback's human hooks.
#[derive(Debug, Clone, Copy)]
pub struct HumanTool {
    kind: HumanInputKind,
}

impl HumanTool {
    pub fn new(kind: HumanInputKind) -> Self {
        Self { kind }
    }
}

/// The human tools `callback` can serve.
pub fn human_tools(callback: &dyn WorkflowCallback) -> Vec<Arc<dyn Tool>> {
    HumanInputKind::ALL
        .into_iter()
        .filter(|kind| callback.supports_human_input(*kind))
        .map(|kind| Arc::new(HumanTool::new(kind)) as Arc<dyn Tool>)
        .collect()
}

fn string_list(v: &Value) -> Vec<String> {
    v.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn no_answer() -> EkoError {
    EkoError::tool("the user did not respond")
}

#[async_trait]
impl Tool for HumanTool {
    fn name(&self) -> &str {
        match self.kind {
            HumanInputKind::Text => "human_input_text",
            HumanInputKind::SingleChoice => "human_input_single_choice",
            HumanInputKind::MultipleChoice => "human_input_multiple_choice",
            HumanInputKind::Operate => "human_operate",
        }
    }

    fn description(&self) -> &str {
        match self.kind {
            HumanInputKind::Text => {
                "Ask the user a question and wait for a free-text answer. \
                 Use it when information is missing and cannot be found otherwise."
            }
            HumanInputKind::SingleChoice => {
                "Ask the user to pick exactly one of the given choices."
            }
            HumanInputKind::MultipleChoice => {
                "Ask the user to pick any number of the given choices."
            }
            HumanInputKind::Operate => {
                "Hand control to the user for an operation you cannot perform yourself, \
                 such as logging in or solving a captcha. Returns what the user did."
            }
        }
    }

    fn input_schema(&self) -> Value {
        match self.kind {
            HumanInputKind::Text => json!({
                "type": "object",
                "properties": {"question": {"type": "string"}},
                "required": ["question"]
            }),
            HumanInputKind::SingleChoice | HumanInputKind::MultipleChoice => json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string"},
                    "choices": {"type": "array", "items": {"type": "string"}, "minItems": 1}
                },
                "required": ["question", "choices"]
            }),
            HumanInputKind::Operate => json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string", "description": "What the user needs to do and why"}
                },
                "required": ["reason"]
            }),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<Value> {
        let callback = ctx
            .callback
            .as_ref()
            .ok_or_else(|| EkoError::tool("no user is attached to this workflow"))?;

        let question = input["question"].as_str().unwrap_or_default();
        tracing::info!(node_id = %ctx.node_id, tool = self.name(), "waiting for user input");

        let answer = match self.kind {
            HumanInputKind::Text => {
                let answer = callback.on_human_input_text(ctx, question).await;
                json!(answer.ok_or_else(no_answer)?)
            }
            HumanInputKind::SingleChoice => {
                let choices = string_list(&input["choices"]);
                let answer = callback
                    .on_human_input_single_choice(ctx, question, &choices)
                    .await
                    .ok_or_else(no_answer)?;
                json!(answer)
            }
            HumanInputKind::MultipleChoice => {
                let choices = string_list(&input["choices"]);
                let answer = callback
                    .on_human_input_multiple_choice(ctx, question, &choices)
                    .await
                    .ok_or_else(no_answer)?;
                json!(answer)
            }
            HumanInputKind::Operate => {
                let reason = input["reason"].as_str().unwrap_or_default();
                let answer = callback
                    .on_human_operate(ctx, reason)
                    .await
                    .ok_or_else(no_answer)?;
                json!(answer)
            }
        };

        Ok(json!({"status": "OK", "answer": answer}))
    }
}
