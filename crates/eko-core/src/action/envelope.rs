//! The envelope every tool call travels in.
//!
//! The model sees each tool with an input schema that wraps the tool's own
//! schema under `toolCall` next to three reporting fields.  The loop strips
//! the envelope before running the real tool.

use serde_json::{Map, Value, json};

use crate::llm::ToolDefinition;

pub const OBSERVATION: &str = "observation";
pub const THINKING: &str = "thinking";
pub const USER_SIDE_PROMPT: &str = "userSidePrompt";
pub const TOOL_CALL: &str = "toolCall";

/// Wrap a tool input schema in the envelope.
pub fn wrap_schema(schema: &Value) -> Value {
    json!({
        "type": "object",
        "properties": {
            OBSERVATION: {
                "type": "string",
                "description": "What you observed in the previous tool result, in one or two sentences"
            },
            THINKING: {
                "type": "string",
                "description": "Your reasoning about what to do next and why this tool call does it"
            },
            USER_SIDE_PROMPT: {
                "type": "string",
                "description": "One short sentence shown to the user describing what you are doing"
            },
            TOOL_CALL: schema,
        },
        "required": [OBSERVATION, THINKING, USER_SIDE_PROMPT, TOOL_CALL]
    })
}

/// Wrap a tool definition's input schema in the envelope.
pub fn wrap_definition(mut definition: ToolDefinition) -> ToolDefinition {
    definition.input_schema = wrap_schema(&definition.input_schema);
    definition
}

/// A tool call with its envelope taken apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Unwrapped {
    pub observation: Option<String>,
    pub thinking: Option<String>,
    pub user_side_prompt: Option<String>,
    /// The arguments for the real tool.
    pub input: Value,
}

/// Split model arguments into envelope fields and tool input.
///
/// Models occasionally flatten the envelope or encode `toolCall` as a JSON
/// string; both are accepted.
pub fn unwrap_input(arguments: Value) -> Unwrapped {
    let Value::Object(mut map) = arguments else {
        return Unwrapped {
            observation: None,
            thinking: None,
            user_side_prompt: None,
            input: arguments,
        };
    };

    let mut take_text = |key: &str| match map.remove(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    };
    let observation = take_text(OBSERVATION);
    let thinking = take_text(THINKING);
    let user_side_prompt = take_text(USER_SIDE_PROMPT);

    let input = match map.remove(TOOL_CALL) {
        Some(Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Some(Value::Null) | None => Value::Object(std::mem::take(&mut map)),
        Some(v) => v,
    };

    Unwrapped {
        observation,
        thinking,
        user_side_prompt,
        input,
    }
}

/// Build envelope arguments around `input`.  The inverse of
/// [`unwrap_input`].
pub fn wrap_input(thinking: &str, user_side_prompt: &str, input: Value) -> Value {
    let mut map = Map::new();
    map.insert(OBSERVATION.into(), json!(""));
    map.insert(THINKING.into(), json!(thinking));
    map.insert(USER_SIDE_PROMPT.into(), json!(user_side_prompt));
    map.insert(TOOL_CALL.into(), input);
    Value::Object(map)
}
