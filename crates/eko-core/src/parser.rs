//! Workflow documents -- the JSON form of a workflow.
//!
//! [`WorkflowParser::validate`] checks a raw document and collects every
//! problem instead of stopping at the first.  [`WorkflowParser::build`]
//! resolves tool names against a registry and produces a runnable
//! [`Workflow`]; [`WorkflowParser::serialize`] goes the other way, leaving
//! out the tools every action gets injected.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::action::{Action, ActionType};
use crate::compression;
use crate::config::EkoConfig;
use crate::error::{EkoError, Result};
use crate::llm::LlmProvider;
use crate::tools::builtin::INJECTED_TOOLS;
use crate::tools::{Tool, ToolRegistry};
use crate::workflow::{Workflow, WorkflowNode};

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

/// A workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub nodes: Vec<NodeDocument>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub action: ActionDocument,
    /// JSON Schema of the node output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDocument {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Outcome of [`WorkflowParser::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Convert into an error when invalid.
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(EkoError::InvalidWorkflow { errors: self.errors })
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Converts between workflow documents and [`Workflow`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowParser;

const ACTION_TYPES: [&str; 3] = ["prompt", "script", "hybrid"];

impl WorkflowParser {
    /// Check a raw document.  Every problem found is reported.
    pub fn validate(value: &Value) -> ValidationResult {
        let mut errors = Vec::new();

        let Some(doc) = value.as_object() else {
            return ValidationResult::from_errors(vec!["workflow must be a JSON object".into()]);
        };
        for field in ["id", "name"] {
            match doc.get(field) {
                Some(Value::String(s)) if !s.is_empty() => {}
                Some(Value::String(_)) => errors.push(format!("workflow `{field}` must not be empty")),
                Some(_) => errors.push(format!("workflow `{field}` must be a string")),
                None => errors.push(format!("workflow is missing `{field}`")),
            }
        }
        if let Some(desc) = doc.get("description")
            && !desc.is_string()
        {
            errors.push("workflow `description` must be a string".into());
        }
        if let Some(vars) = doc.get("variables")
            && !vars.is_object()
        {
            errors.push("workflow `variables` must be an object".into());
        }

        let nodes = match doc.get("nodes") {
            Some(Value::Array(nodes)) => nodes,
            Some(_) => {
                errors.push("workflow `nodes` must be an array".into());
                return ValidationResult::from_errors(errors);
            }
            None => {
                errors.push("workflow is missing `nodes`".into());
                return ValidationResult::from_errors(errors);
            }
        };

        let mut ids: Vec<&str> = Vec::new();
        let mut seen = HashSet::new();
        for (i, node) in nodes.iter().enumerate() {
            let Some(node) = node.as_object() else {
                errors.push(format!("node {i} must be an object"));
                continue;
            };
            match node.get("id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => {
                    if !seen.insert(id) {
                        errors.push(format!("duplicate node id `{id}`"));
                    }
                    ids.push(id);
                }
                _ => errors.push(format!("node {i} is missing a string `id`")),
            }
            for field in ["name", "description"] {
                if let Some(v) = node.get(field)
                    && !v.is_string()
                {
                    errors.push(format!("node {i} `{field}` must be a string"));
                }
            }
            validate_action(i, node.get("action"), &mut errors);
        }

        let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut dependencies_ok = true;
        for (i, node) in nodes.iter().enumerate() {
            let Some(node) = node.as_object() else { continue };
            let id = node.get("id").and_then(Value::as_str);
            let deps = match node.get("dependencies") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(deps)) => {
                    let mut names = Vec::with_capacity(deps.len());
                    for dep in deps {
                        match dep.as_str() {
                            Some(d) if seen.contains(d) => names.push(d),
                            Some(d) => {
                                dependencies_ok = false;
                                errors.push(format!("node {i} depends on unknown node `{d}`"));
                            }
                            None => {
                                dependencies_ok = false;
                                errors.push(format!("node {i} has a non-string dependency"));
                            }
                        }
                    }
                    names
                }
                Some(_) => {
                    dependencies_ok = false;
                    errors.push(format!("node {i} `dependencies` must be an array"));
                    Vec::new()
                }
            };
            if let Some(id) = id {
                graph.entry(id).or_default().extend(deps);
            }
        }

        if dependencies_ok && let Some(node_id) = first_cycle(&ids, &graph) {
            errors.push(format!("circular dependency at node `{node_id}`"));
        }

        ValidationResult::from_errors(errors)
    }

    /// Tool names in `doc` that `registry` does not provide.
    pub fn unknown_tools(doc: &WorkflowDocument, registry: &ToolRegistry) -> Vec<String> {
        let mut missing: Vec<String> = doc
            .nodes
            .iter()
            .flat_map(|n| n.action.tools.iter())
            .filter(|t| !INJECTED_TOOLS.contains(&t.as_str()))
            .filter(|t| registry.get_tool(t).is_err())
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Parse and validate a document from JSON text.
    pub fn parse(json: &str) -> Result<WorkflowDocument> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Validate and convert an already-parsed document.
    pub fn from_value(value: Value) -> Result<WorkflowDocument> {
        Self::validate(&value).into_result()?;
        Ok(serde_json::from_value(value)?)
    }

    /// Build a runnable workflow.  Every tool must be registered.
    pub fn build(
        doc: &WorkflowDocument,
        registry: &ToolRegistry,
        llm: Arc<dyn LlmProvider>,
        config: &EkoConfig,
    ) -> Result<Workflow> {
        let compressor = compression::from_config(&config.compression);
        let mut workflow = Workflow::new(doc.id.clone(), doc.name.clone(), llm)
            .with_description(doc.description.clone())
            .with_variables(doc.variables.clone());

        for node in &doc.nodes {
            let tools = node
                .action
                .tools
                .iter()
                .filter(|t| !INJECTED_TOOLS.contains(&t.as_str()))
                .map(|t| registry.get_tool(t))
                .collect::<Result<Vec<Arc<dyn Tool>>>>()?;
            let action = Action::new(
                node.action.action_type,
                node.action.name.clone(),
                node.action.description.clone(),
                tools,
                config.action.clone(),
            )
            .with_compressor(compressor.clone());

            let mut built = WorkflowNode::new(node.id.clone(), action)
                .with_name(node.name.clone().unwrap_or_else(|| node.id.clone()))
                .with_description(node.description.clone().unwrap_or_default())
                .with_dependencies(node.dependencies.iter().cloned());
            if let Some(schema) = &node.output {
                built = built.with_output_schema(schema.clone());
            }
            workflow.add_node(built)?;
        }

        workflow.validate_dag()?;
        debug!(workflow_id = %workflow.id, nodes = workflow.nodes().len(), "workflow built");
        Ok(workflow)
    }

    /// The document describing `workflow`.  Injected tools and internal
    /// variables are left out.
    pub fn to_document(workflow: &Workflow) -> WorkflowDocument {
        let nodes = workflow
            .nodes()
            .iter()
            .map(|n| NodeDocument {
                id: n.id.clone(),
                name: Some(n.name.clone()),
                description: (!n.description.is_empty()).then(|| n.description.clone()),
                dependencies: n.dependencies.clone(),
                action: ActionDocument {
                    action_type: n.action.action_type,
                    name: n.action.name.clone(),
                    description: n.action.description.clone(),
                    tools: n
                        .action
                        .tool_names()
                        .into_iter()
                        .filter(|t| !INJECTED_TOOLS.contains(&t.as_str()))
                        .collect(),
                },
                output: n.output_schema.clone(),
            })
            .collect();

        WorkflowDocument {
            id: workflow.id.clone(),
            name: workflow.name.clone(),
            description: workflow.description.clone(),
            nodes,
            variables: workflow
                .variables()
                .snapshot()
                .into_iter()
                .filter(|(k, _)| !k.starts_with("__"))
                .collect(),
        }
    }

    /// Serialize `workflow` as pretty-printed JSON.
    pub fn serialize(workflow: &Workflow) -> Result<String> {
        Ok(serde_json::to_string_pretty(&Self::to_document(workflow))?)
    }
}

fn validate_action(i: usize, action: Option<&Value>, errors: &mut Vec<String>) {
    let Some(action) = action else {
        errors.push(format!("node {i} is missing `action`"));
        return;
    };
    let Some(action) = action.as_object() else {
        errors.push(format!("node {i} `action` must be an object"));
        return;
    };

    match action.get("type").and_then(Value::as_str) {
        Some(t) if ACTION_TYPES.contains(&t) => {}
        Some(t) => errors.push(format!(
            "node {i} action type `{t}` is not one of {}",
            ACTION_TYPES.join(", ")
        )),
        None => errors.push(format!("node {i} action is missing a string `type`")),
    }
    for field in ["name", "description"] {
        if !action.get(field).is_some_and(Value::is_string) {
            errors.push(format!("node {i} action is missing a string `{field}`"));
        }
    }
    match action.get("tools") {
        None | Some(Value::Null) => {}
        Some(Value::Array(tools)) => {
            if tools.iter().any(|t| !t.is_string()) {
                errors.push(format!("node {i} action `tools` must contain only strings"));
            }
        }
        Some(_) => errors.push(format!("node {i} action `tools` must be an array")),
    }
}

/// First node (in declaration order) found on a dependency cycle.
fn first_cycle<'a>(ids: &[&'a str], graph: &HashMap<&'a str, Vec<&'a str>>) -> Option<&'a str> {
    fn visit<'a>(
        id: &'a str,
        graph: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> Option<&'a str> {
        if on_stack.contains(id) {
            return Some(id);
        }
        if !visited.insert(id) {
            return None;
        }
        on_stack.insert(id);
        for dep in graph.get(id).into_iter().flatten() {
            if let Some(found) = visit(dep, graph, visited, on_stack) {
                return Some(found);
            }
        }
        on_stack.remove(id);
        None
    }

    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    ids.iter()
        .find_map(|id| visit(id, graph, &mut visited, &mut on_stack))
}
