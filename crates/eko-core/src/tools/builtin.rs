//! Tools injected into every action.
//!
//! These two are the only tools allowed to write engine bookkeeping into
//! the variable store.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::{ExecutionContext, IS_SUCCESSFUL_KEY, action_output_key};
use crate::error::{EkoError, Result};
use crate::tools::Tool;

pub const WRITE_CONTEXT: &str = "write_context";
pub const RETURN_OUTPUT: &str = "return_output";

/// Names the parser must not resolve from the registry and the serializer
/// must not emit.
pub const INJECTED_TOOLS: [&str; 2] = [WRITE_CONTEXT, RETURN_OUTPUT];

// ---------------------------------------------------------------------------
// write_context
// ---------------------------------------------------------------------------

/// Persists a key/value pair in the workflow variable store so later nodes
/// can read it.
#[derive(Debug, Default)]
pub struct WriteContextTool;

#[async_trait]
impl Tool for WriteContextTool {
    fn name(&self) -> &str {
        WRITE_CONTEXT
    }

    fn description(&self) -> &str {
        "Store a value in the shared workflow context so that later steps can use it. \
         Use it for intermediate results other steps depend on."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Context key, e.g. `search_results`"
                },
                "value": {
                    "description": "Any JSON value to store"
                }
            },
            "required": ["key", "value"]
        })
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<Value> {
        let key = input["key"]
            .as_str()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EkoError::tool("`key` must be a non-empty string"))?;
        if key.starts_with("__") {
            return Err(EkoError::tool(format!(
                "context keys starting with `__` are reserved: {key}"
            )));
        }

        // Models often send JSON as a string; keep structured data structured.
        let value = match &input["value"] {
            Value::String(s) => serde_json::from_str::<Value>(s)
                .ok()
                .filter(|v| v.is_object() || v.is_array())
                .unwrap_or_else(|| Value::String(s.clone())),
            other => other.clone(),
        };

        ctx.variables.set(key, value);
        tracing::debug!(node_id = %ctx.node_id, key, "context written");
        Ok(json!(format!("Context `{key}` updated.")))
    }
}

// ---------------------------------------------------------------------------
// return_output
// ---------------------------------------------------------------------------

/// Ends the action with a value.
///
/// The value is left in the variable store under
/// `__action_<node>_<name>_output`; the action loop of that node takes it
/// from there and removes it.
#[derive(Debug, Clone)]
pub struct ReturnOutputTool {
    action_name: String,
    output_schema: Option<Value>,
}

impl ReturnOutputTool {
    pub fn new(action_name: impl Into<String>, output_schema: Option<Value>) -> Self {
        Self {
            action_name: action_name.into(),
            output_schema,
        }
    }
}

/// What `return_output` recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnedOutput {
    pub use_tool_result: bool,
    pub value: Value,
}

impl ReturnedOutput {
    /// Take the output `action_name` recorded for the context's node out of
    /// the store.
    pub fn take(ctx: &ExecutionContext, action_name: &str) -> Option<Self> {
        let raw = ctx
            .variables
            .remove(&action_output_key(&ctx.node_id, action_name))?;
        Some(Self {
            use_tool_result: raw["use_tool_result"].as_bool().unwrap_or(false),
            value: raw.get("value").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Combine a success flag into `__isSuccessful__`.  Absent counts as true
/// for the first writer; later writers can only lower it.
pub fn record_success(ctx: &ExecutionContext, successful: bool) {
    ctx.variables.update(IS_SUCCESSFUL_KEY, |old| {
        let previous = old.and_then(Value::as_bool).unwrap_or(true);
        Value::Bool(previous && successful)
    });
}

#[async_trait]
impl Tool for ReturnOutputTool {
    fn name(&self) -> &str {
        RETURN_OUTPUT
    }

    fn description(&self) -> &str {
        "Finish the current step and return its output. Call this exactly once, \
         when the step is complete or cannot be completed."
    }

    fn input_schema(&self) -> Value {
        let value_schema = self
            .output_schema
            .clone()
            .unwrap_or_else(|| json!({"description": "The step output, any JSON value"}));
        json!({
            "type": "object",
            "properties": {
                "isSuccessful": {
                    "type": "boolean",
                    "description": "Whether the step achieved its goal"
                },
                "use_tool_result": {
                    "type": "boolean",
                    "description": "Set to true to return the result of the most recent tool call \
                                    instead of `value`, avoiding re-typing large outputs"
                },
                "value": value_schema
            },
            "required": ["isSuccessful", "use_tool_result"]
        })
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<Value> {
        let successful = input["isSuccessful"].as_bool().unwrap_or(false);
        let use_tool_result = input["use_tool_result"].as_bool().unwrap_or(false);

        record_success(ctx, successful);
        ctx.variables.set(
            action_output_key(&ctx.node_id, &self.action_name),
            json!({
                "use_tool_result": use_tool_result,
                "value": input.get("value").cloned().unwrap_or(Value::Null),
            }),
        );

        tracing::debug!(
            node_id = %ctx.node_id,
            action = %self.action_name,
            successful,
            use_tool_result,
            "output returned"
        );
        Ok(json!("Output recorded."))
    }
}
