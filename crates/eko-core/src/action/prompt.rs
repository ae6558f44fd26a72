//! Prompts for the action loop.

use std::fmt::Write as _;

use serde_json::Value;

use crate::context::ExecutionContext;
use crate::tools::{RETURN_OUTPUT, WRITE_CONTEXT};
use crate::workflow::NodeInput;

/// Sent when the model answered without calling a tool.
pub const FINALIZE_NO_TOOL: &str = "You replied without calling a tool. \
The step ends now: call `return_output` with the final result of this step, \
based on everything above. Set isSuccessful to false if the step was not completed.";

/// Sent when the round budget is spent.
pub const FINALIZE_STEP_BUDGET: &str = "You have used all available steps for this task. \
Call `return_output` now with your best-effort result based on the work done so far. \
Set isSuccessful to false if the step was not completed.";

/// System prompt for one action.
pub fn system_prompt(ctx: &ExecutionContext) -> String {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M");
    format!(
        "You are Eko, an autonomous agent executing one step of a larger workflow.\n\
         Current time: {now}\n\
         Workflow: {workflow_id}\n\
         \n\
         Every tool call takes an envelope:\n\
         - observation: what you observed in the previous tool result\n\
         - thinking: your reasoning about the next action\n\
         - userSidePrompt: one short sentence telling the user what you are doing\n\
         - toolCall: the arguments of the tool itself\n\
         \n\
         Use `{WRITE_CONTEXT}` to store results that later steps will need.\n\
         When this step is complete, or cannot be completed, call `{RETURN_OUTPUT}` exactly once. \
         Report isSuccessful honestly. If the most recent tool result already is the answer, \
         set use_tool_result to true instead of copying it into value.",
        workflow_id = ctx.workflow_id,
    )
}

/// Task prompt for one action.
pub fn user_prompt(
    name: &str,
    description: &str,
    input: &NodeInput,
    ctx: &ExecutionContext,
    output_schema: Option<&Value>,
) -> String {
    let mut prompt = format!("# Step: {name}\n{description}\n");

    prompt.push_str("\n# Input from previous steps\n");
    if input.is_empty() {
        prompt.push_str("(none)\n");
    } else {
        for item in &input.items {
            let _ = writeln!(prompt, "## {}\n{}", item.node_id, render_value(&item.value));
        }
    }

    let keys: Vec<String> = ctx
        .variables
        .snapshot()
        .into_keys()
        .filter(|k| !k.starts_with("__"))
        .collect();
    if !keys.is_empty() {
        let _ = writeln!(prompt, "\n# Context variables\n{}", keys.join(", "));
        for key in &keys {
            if let Some(value) = ctx.variables.get(key) {
                let _ = writeln!(prompt, "- {key}: {}", render_value(&value));
            }
        }
    }

    if let Some(schema) = output_schema {
        let rendered = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
        let _ = writeln!(
            prompt,
            "\n# Output\nThe value passed to `{RETURN_OUTPUT}` must match this JSON Schema:\n{rendered}"
        );
    }

    prompt
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
