//! Terminal implementation of the workflow hooks.
//!
//! Prints progress to stderr and answers human-input requests from stdin.
//! Prompts are serialized so concurrent nodes never interleave questions.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use eko_core::{
    ExecutionContext, HookDecision, HumanInputKind, Workflow, WorkflowCallback, WorkflowNode,
    WorkflowResult,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Default)]
pub struct ConsoleCallback {
    prompt_lock: Mutex<()>,
}

impl ConsoleCallback {
    /// Print `question` and read one line.  `None` on EOF or read failure.
    async fn ask(&self, question: String) -> Option<String> {
        let _guard = self.prompt_lock.lock().await;
        let answer = tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
            let mut out = io::stderr();
            write!(out, "{question}")?;
            out.flush()?;
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line)? == 0 {
                return Ok(None);
            }
            Ok(Some(line.trim().to_owned()))
        })
        .await;

        match answer {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to read answer from stdin");
                None
            }
            Err(e) => {
                warn!(error = %e, "stdin reader task failed");
                None
            }
        }
    }
}

/// Render a numbered choice list followed by `prompt`.
fn choice_prompt(question: &str, choices: &[String], prompt: &str) -> String {
    let mut text = format!("\n? {question}\n");
    for (i, choice) in choices.iter().enumerate() {
        text.push_str(&format!("    ({}) {choice}\n", i + 1));
    }
    text.push_str(prompt);
    text
}

/// Resolve one answer token to a choice: a 1-based index or the choice text
/// itself (case-insensitive).
fn resolve_choice(token: &str, choices: &[String]) -> Option<String> {
    let token = token.trim();
    if let Ok(index) = token.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| choices.get(i))
            .cloned();
    }
    choices
        .iter()
        .find(|c| c.eq_ignore_ascii_case(token))
        .cloned()
}

/// Resolve a comma-separated answer, dropping tokens that match nothing.
fn resolve_choices(answer: &str, choices: &[String]) -> Vec<String> {
    let mut picked: Vec<String> = Vec::new();
    for choice in answer
        .split(',')
        .filter(|t| !t.trim().is_empty())
        .filter_map(|t| resolve_choice(t, choices))
    {
        if !picked.contains(&choice) {
            picked.push(choice);
        }
    }
    picked
}

#[async_trait]
impl WorkflowCallback for ConsoleCallback {
    async fn before_workflow(&self, workflow: &Workflow) {
        eprintln!("> {} ({} steps)", workflow.name, workflow.nodes().len());
    }

    async fn after_workflow(&self, workflow: &Workflow, result: &WorkflowResult) {
        let status = if result.is_successful { "completed" } else { "not completed" };
        eprintln!("> {} {status}", workflow.name);
    }

    async fn before_subtask(&self, _ctx: &ExecutionContext, node: &WorkflowNode) -> HookDecision {
        eprintln!("  - {} ...", node.name);
        HookDecision::Continue
    }

    async fn after_subtask(&self, _ctx: &ExecutionContext, node: &WorkflowNode, _output: &Value) {
        eprintln!("  - {} done", node.name);
    }

    async fn on_llm_message_user_side_prompt(
        &self,
        _ctx: &ExecutionContext,
        prompt: &str,
        _tool_name: &str,
    ) {
        eprintln!("    {prompt}");
    }

    fn supports_human_input(&self, _kind: HumanInputKind) -> bool {
        true
    }

    async fn on_human_input_text(&self, _ctx: &ExecutionContext, question: &str) -> Option<String> {
        self.ask(format!("\n? {question}\n  > ")).await
    }

    async fn on_human_input_single_choice(
        &self,
        _ctx: &ExecutionContext,
        question: &str,
        choices: &[String],
    ) -> Option<String> {
        let answer = self
            .ask(choice_prompt(question, choices, "  Enter a number: "))
            .await?;
        resolve_choice(&answer, choices)
    }

    async fn on_human_input_multiple_choice(
        &self,
        _ctx: &ExecutionContext,
        question: &str,
        choices: &[String],
    ) -> Option<Vec<String>> {
        let answer = self
            .ask(choice_prompt(question, choices, "  Enter numbers separated by commas: "))
            .await?;
        Some(resolve_choices(&answer, choices))
    }

    async fn on_human_operate(&self, _ctx: &ExecutionContext, reason: &str) -> Option<String> {
        self.ask(format!(
            "\n! Your help is needed: {reason}\n  Describe what you did and press Enter: "
        ))
        .await
    }
}
