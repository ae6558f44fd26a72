//! Tools the model can invoke during an action.
//!
//! - [`registry`] -- The named tool set shared by the generator and parser.
//! - [`builtin`] -- `write_context` and `return_output`, injected into every action.
//! - [`human`] -- Human-interaction tools backed by the workflow callback.

pub mod builtin;
pub mod human;
pub mod registry;

use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::{EkoError, Result};
use crate::llm::ToolDefinition;

pub use builtin::{RETURN_OUTPUT, ReturnOutputTool, WRITE_CONTEXT, WriteContextTool};
pub use human::human_tools;
pub use registry::ToolRegistry;

/// A named, schema-described capability.
///
/// Tools are shared between nodes and must not keep per-call state; anything
/// a tool needs to remember goes into the context's variable store.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a registry.
    fn name(&self) -> &str;

    /// What the tool does, as shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the tool's input.
    fn input_schema(&self) -> Value;

    /// Run the tool.  Errors are reported back to the model as
    /// `"Error: <message>"` tool results.
    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<Value>;

    /// Release resources held for `ctx`.  Called once the action finishes.
    async fn destroy(&self, _ctx: &ExecutionContext) {}

    /// The definition handed to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            input_schema: self.input_schema(),
        }
    }
}

/// Check `input` against the tool's input schema.
pub fn validate_input(tool: &dyn Tool, input: &Value) -> Result<()> {
    let schema = tool.input_schema();
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|e| EkoError::InvalidToolInput {
            tool_name: tool.name().to_owned(),
            reason: format!("tool schema does not compile: {e}"),
        })?;

    if let Err(errors) = compiled.validate(input) {
        let messages: Vec<String> = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        return Err(EkoError::InvalidToolInput {
            tool_name: tool.name().to_owned(),
            reason: messages.join(", "),
        });
    }
    Ok(())
}
