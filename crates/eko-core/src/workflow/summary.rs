//! The summary step run after every node has finished.
//!
//! The model receives the workflow structure, the public variables and the
//! node outputs, and must answer through the `summarize_workflow` tool.  A
//! failed summary call never fails the run: a digest of the terminal node
//! outputs is used instead.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::action::results::strip_images;
use crate::error::{EkoError, Result};
use crate::llm::{LlmParams, Message, ToolChoice, ToolDefinition};
use crate::workflow::Workflow;

pub const SUMMARIZE_TOOL: &str = "summarize_workflow";

const SYSTEM_PROMPT: &str = "You report the outcome of an automated workflow to the user who requested it. \
Be factual and concise. Only state what the node outputs show.";

/// Longest rendering of a single output in the fallback digest.
const DIGEST_OUTPUT_CHARS: usize = 500;

/// The outcome of the summary step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Summary {
    pub summary: String,
    #[serde(default, rename = "isDocumentGenerationTask")]
    pub is_document_generation_task: bool,
    #[serde(default)]
    pub document: Option<String>,
}

impl Summary {
    /// The document for document tasks, otherwise the summary text.
    pub fn payload(&self) -> String {
        match &self.document {
            Some(doc) if self.is_document_generation_task && !doc.trim().is_empty() => doc.clone(),
            _ => self.summary.clone(),
        }
    }
}

/// Definition of the forced summary tool.
pub fn summary_tool() -> ToolDefinition {
    ToolDefinition {
        name: SUMMARIZE_TOOL.into(),
        description: "Report the outcome of the workflow.".into(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "What was done and what came out of it, addressed to the user"
                },
                "isDocumentGenerationTask": {
                    "type": "boolean",
                    "description": "Whether the user asked for a document (report, article, email, ...)"
                },
                "document": {
                    "type": "string",
                    "description": "The full document, when isDocumentGenerationTask is true"
                }
            },
            "required": ["summary", "isDocumentGenerationTask"]
        }),
    }
}

/// Structure, public variables and outputs of `workflow`, as sent to the
/// model.
pub fn summary_input(workflow: &Workflow) -> Value {
    let nodes: Vec<Value> = workflow
        .nodes()
        .iter()
        .map(|n| {
            json!({
                "id": n.id,
                "name": n.name,
                "description": n.description,
                "dependencies": n.dependencies,
                "output": n.output().map(strip_images).unwrap_or(Value::Null),
            })
        })
        .collect();
    let variables: serde_json::Map<String, Value> = workflow
        .variables()
        .snapshot()
        .into_iter()
        .filter(|(k, _)| !k.starts_with("__"))
        .map(|(k, v)| (k, strip_images(&v)))
        .collect();

    json!({
        "id": workflow.id,
        "name": workflow.name,
        "description": workflow.description,
        "nodes": nodes,
        "variables": variables,
    })
}

/// Summarize a finished run.  Falls back to [`digest`] on failure.
pub async fn summarize(workflow: &Workflow) -> Summary {
    match request_summary(workflow).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!(error = %e, "summary step failed, using output digest");
            digest(workflow)
        }
    }
}

async fn request_summary(workflow: &Workflow) -> Result<Summary> {
    let rendered = serde_json::to_string_pretty(&summary_input(workflow))?;
    let prompt = format!(
        "The workflow below has finished. Summarize its outcome by calling `{SUMMARIZE_TOOL}`.\n\n{rendered}"
    );
    let params = LlmParams {
        tools: vec![summary_tool()],
        tool_choice: Some(ToolChoice::Tool {
            name: SUMMARIZE_TOOL.into(),
        }),
        ..LlmParams::default()
    };

    let response = workflow
        .llm()
        .generate_text(&[Message::system(SYSTEM_PROMPT), Message::user(prompt)], &params)
        .await?;

    if let Some(call) = response.tool_calls.iter().find(|c| c.name == SUMMARIZE_TOOL) {
        let summary: Summary =
            serde_json::from_value(call.arguments.clone()).map_err(|e| EkoError::LlmParseFailed {
                reason: format!("invalid {SUMMARIZE_TOOL} arguments: {e}"),
            })?;
        debug!(document = summary.is_document_generation_task, "summary received");
        return Ok(summary);
    }

    match response.text_content {
        Some(text) if !text.trim().is_empty() => Ok(Summary {
            summary: text.trim().to_owned(),
            is_document_generation_task: false,
            document: None,
        }),
        _ => Err(EkoError::LlmParseFailed {
            reason: "summary response had neither a tool call nor text".into(),
        }),
    }
}

/// Plain-text digest of the terminal node outputs.
pub fn digest(workflow: &Workflow) -> Summary {
    let mut text = format!("Workflow `{}` finished.", workflow.name);
    for node in workflow.terminal_nodes() {
        let output = match node.output().map(strip_images) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => "(no output)".into(),
            Some(other) => other.to_string(),
        };
        let output: String = output.chars().take(DIGEST_OUTPUT_CHARS).collect();
        text.push_str(&format!("\n- {}: {}", node.name, output));
    }
    Summary {
        summary: text,
        is_document_generation_task: false,
        document: None,
    }
}
