//! Workflow nodes and the values flowing between them.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::Action;
use crate::error::{EkoError, Result};
use crate::llm::Message;

/// One dependency's output, as seen by the dependent node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub node_id: String,
    pub value: Value,
}

/// A node's input: its dependencies' outputs in dependency-list order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
    pub items: Vec<NodeOutput>,
}

impl NodeInput {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The input as a JSON array of `{node_id, value}` objects.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.items).unwrap_or(Value::Array(Vec::new()))
    }
}

/// One sub-task of a workflow.
///
/// `input`, `output` and `transcript` are write-once slots filled while the
/// workflow runs.
#[derive(Debug)]
pub struct WorkflowNode {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Ids of the nodes that must finish first.
    pub dependencies: Vec<String>,
    pub action: Action,
    /// JSON Schema the node output should match, shown to the model.
    pub output_schema: Option<Value>,
    input: OnceLock<NodeInput>,
    output: OnceLock<Value>,
    transcript: OnceLock<Vec<Message>>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, action: Action) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            dependencies: Vec::new(),
            action,
            output_schema: None,
            input: OnceLock::new(),
            output: OnceLock::new(),
            transcript: OnceLock::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn input(&self) -> Option<&NodeInput> {
        self.input.get()
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.get()
    }

    /// The action transcript, once the node has run.
    pub fn transcript(&self) -> Option<&[Message]> {
        self.transcript.get().map(Vec::as_slice)
    }

    pub fn is_executed(&self) -> bool {
        self.output.get().is_some()
    }

    pub(crate) fn set_input(&self, input: NodeInput) {
        let _ = self.input.set(input);
    }

    /// Write the output slot.  A node's output is written exactly once.
    pub(crate) fn set_output(&self, value: Value) -> Result<()> {
        self.output.set(value).map_err(|_| EkoError::AlreadyExecuted {
            node_id: self.id.clone(),
        })
    }

    pub(crate) fn set_transcript(&self, messages: Vec<Message>) {
        let _ = self.transcript.set(messages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::config::ActionConfig;
    use serde_json::json;

    fn node(id: &str) -> WorkflowNode {
        let action = Action::new(ActionType::Prompt, id, "", Vec::new(), ActionConfig::default());
        WorkflowNode::new(id, action)
    }

    #[test]
    fn output_is_written_once() {
        let n = node("a");
        assert!(!n.is_executed());
        n.set_output(json!("first")).unwrap();
        let err = n.set_output(json!("second")).unwrap_err();
        assert_eq!(err, EkoError::AlreadyExecuted { node_id: "a".into() });
        assert_eq!(n.output(), Some(&json!("first")));
    }

    #[test]
    fn input_serializes_in_order() {
        let input = NodeInput {
            items: vec![
                NodeOutput { node_id: "a".into(), value: json!(1) },
                NodeOutput { node_id: "b".into(), value: json!("x") },
            ],
        };
        assert_eq!(
            input.to_value(),
            json!([{"node_id": "a", "value": 1}, {"node_id": "b", "value": "x"}])
        );
    }

    #[test]
    fn builder_sets_fields() {
        let n = node("b").with_name("Report").with_dependencies(["a"]);
        assert_eq!(n.name, "Report");
        assert_eq!(n.dependencies, vec!["a".to_string()]);
    }
}
