//! Workflow generator.
//!
//! Asks the model for a workflow document through the forced
//! `generate_workflow` tool, validates it, and retries with the collected
//! validation errors when it is rejected.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EkoConfig;
use crate::error::{EkoError, Result};
use crate::llm::{ContentBlock, LlmParams, LlmProvider, Message, ToolChoice, ToolDefinition};
use crate::parser::{WorkflowDocument, WorkflowParser};
use crate::tools::ToolRegistry;
use crate::workflow::Workflow;

pub const GENERATE_TOOL: &str = "generate_workflow";

/// Produces workflows from natural-language requests.
pub struct WorkflowGenerator {
    llm: Arc<dyn LlmProvider>,
    registry: ToolRegistry,
    config: EkoConfig,
}

impl WorkflowGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, registry: ToolRegistry, config: EkoConfig) -> Self {
        Self {
            llm,
            registry,
            config,
        }
    }

    /// Generate a workflow for `prompt`.  The workflow gets a fresh id.
    pub async fn generate(&self, prompt: &str) -> Result<Workflow> {
        let request = format!("Create a workflow for this task:\n\n{prompt}");
        let mut doc = self.request_document(request).await?;
        doc.id = Uuid::now_v7().to_string();
        info!(workflow_id = %doc.id, nodes = doc.nodes.len(), "workflow generated");
        WorkflowParser::build(&doc, &self.registry, self.llm.clone(), &self.config)
    }

    /// Produce a new workflow from `workflow` changed as `prompt` asks.  The
    /// workflow id is kept.
    pub async fn modify(&self, workflow: &Workflow, prompt: &str) -> Result<Workflow> {
        let current = WorkflowParser::serialize(workflow)?;
        let request = format!(
            "Here is an existing workflow:\n\n{current}\n\n\
             Modify it as follows and return the complete updated workflow:\n\n{prompt}"
        );
        let mut doc = self.request_document(request).await?;
        doc.id = workflow.id.clone();
        info!(workflow_id = %doc.id, nodes = doc.nodes.len(), "workflow modified");
        WorkflowParser::build(&doc, &self.registry, self.llm.clone(), &self.config)
    }

    fn system_prompt(&self) -> String {
        let tools: String = self
            .registry
            .get_tool_definitions()
            .iter()
            .map(|t| format!("- `{}`: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        let tools = if tools.is_empty() { "(none)".to_owned() } else { tools };

        format!(
            "You plan workflows for Eko, an automation agent. A workflow is a directed acyclic graph \
             of nodes; each node is one step carried out by an agent with a set of tools.\n\n\
             ## Available tools\n{tools}\n\n\
             ## Rules\n\
             - Use only the tools listed above. Every node may additionally store values for later \
               steps and report its output; do not list those tools.\n\
             - Give every node a unique id. List in `dependencies` the ids of the nodes whose \
               output it needs. Never create cycles.\n\
             - Nodes without a dependency relation run in parallel.\n\
             - The action description must contain detailed instructions for the step.\n\
             - Answer by calling `{GENERATE_TOOL}`."
        )
    }

    fn tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: GENERATE_TOOL.into(),
            description: "Submit the workflow.".into(),
            input_schema: self.registry.get_workflow_schema(),
        }
    }

    /// Ask for a document until one validates or attempts run out.
    async fn request_document(&self, request: String) -> Result<WorkflowDocument> {
        let attempts = self.config.generator.max_attempts.max(1);
        let params = LlmParams {
            model: self.config.llm.model.clone(),
            max_tokens: Some(self.config.generator.max_tokens),
            temperature: self.config.generator.temperature,
            tools: vec![self.tool_definition()],
            tool_choice: Some(ToolChoice::Tool {
                name: GENERATE_TOOL.into(),
            }),
        };
        let mut messages = vec![Message::system(self.system_prompt()), Message::user(request)];
        let mut last_errors = Vec::new();

        for attempt in 1..=attempts {
            let response = self.llm.generate_text(&messages, &params).await?;

            let (candidate, call_id) = match response.tool_calls.iter().find(|c| c.name == GENERATE_TOOL) {
                Some(call) => (Ok(call.arguments.clone()), Some(call.id.clone())),
                None => (
                    response
                        .text_content
                        .as_deref()
                        .map(document_from_text)
                        .unwrap_or_else(|| Err("the reply contained no workflow".to_owned())),
                    None,
                ),
            };

            let errors = match candidate {
                Ok(value) => match self.check(value) {
                    Ok(doc) => {
                        debug!(attempt, "workflow document accepted");
                        return Ok(doc);
                    }
                    Err(errors) => errors,
                },
                Err(reason) => vec![reason],
            };

            warn!(attempt, attempts, errors = ?errors, "generated workflow rejected");
            let feedback = format!(
                "The workflow was rejected:\n- {}\nFix every problem and call `{GENERATE_TOOL}` again.",
                errors.join("\n- ")
            );
            match call_id {
                Some(id) => {
                    messages.push(Message::assistant_blocks(response.content.clone()));
                    // Every tool use of the turn needs a result.
                    let results = response
                        .tool_calls
                        .iter()
                        .map(|c| ContentBlock::ToolResult {
                            tool_use_id: c.id.clone(),
                            content: vec![ContentBlock::text(if c.id == id {
                                feedback.clone()
                            } else {
                                "ignored".to_owned()
                            })],
                            is_error: true,
                        })
                        .collect();
                    messages.push(Message::tool_results(results));
                }
                None => {
                    if let Some(text) = response.text_content.clone() {
                        messages.push(Message::assistant(text));
                    }
                    messages.push(Message::user(feedback));
                }
            }
            last_errors = errors;
        }

        Err(EkoError::InvalidWorkflow {
            errors: last_errors,
        })
    }

    /// Validate a candidate against the document rules and the registry.
    fn check(&self, value: Value) -> std::result::Result<WorkflowDocument, Vec<String>> {
        let validation = WorkflowParser::validate(&value);
        if !validation.valid {
            return Err(validation.errors);
        }
        let doc: WorkflowDocument =
            serde_json::from_value(value).map_err(|e| vec![format!("malformed workflow: {e}")])?;
        let unknown = WorkflowParser::unknown_tools(&doc, &self.registry);
        if !unknown.is_empty() {
            return Err(unknown
                .into_iter()
                .map(|t| format!("unknown tool `{t}`"))
                .collect());
        }
        Ok(doc)
    }
}

/// Parse a workflow document out of a text reply.
fn document_from_text(text: &str) -> std::result::Result<Value, String> {
    let json = extract_json_block(text);
    serde_json::from_str(json).map_err(|e| format!("the reply is not a JSON workflow: {e}"))
}

/// Try to extract a JSON block from text that might be wrapped in markdown
/// code fences.
fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let json_start = start + "```json".len();
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let json_start = start + 3;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Fall back to the outermost braces.
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}
