//! CLI entry point for Eko.
//!
//! This binary provides the `eko` command with subcommands for generating,
//! validating and executing workflows.

mod console;
mod helpers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use eko_core::{Eko, Workflow, WorkflowParser, WorkflowResult};
use tracing::{info, warn};

use crate::console::ConsoleCallback;
use crate::helpers::{build_eko, init_tracing, load_config};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Eko -- LLM-driven workflow automation.
#[derive(Parser)]
#[command(
    name = "eko",
    version,
    about = "Eko -- LLM-driven workflow automation",
    long_about = "Turns a natural-language goal into a workflow of sub-tasks and executes it, \
                  letting each step call tools and the model until it produces an output."
)]
struct Cli {
    /// Configuration file (TOML).  Defaults to `eko.toml` when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a workflow for a prompt and execute it.
    Run {
        /// What to do.
        prompt: String,
    },

    /// Generate a workflow and print (or save) its JSON document.
    Generate {
        prompt: String,

        /// Write the document here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Execute a workflow document.
    Execute {
        file: PathBuf,
    },

    /// Check a workflow document and list every problem.
    Validate {
        file: PathBuf,
    },

    /// Print the JSON Schema of workflow documents.
    Schema,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "info" }, cli.log_json);

    match cli.command {
        Commands::Run { prompt } => cmd_run(cli.config, &prompt).await,
        Commands::Generate { prompt, output } => cmd_generate(cli.config, &prompt, output).await,
        Commands::Execute { file } => cmd_execute(cli.config, &file).await,
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Schema => cmd_schema(),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_run(config: Option<PathBuf>, prompt: &str) -> Result<()> {
    let eko = build_eko(load_config(config.as_deref())?)?
        .with_callback(Arc::new(ConsoleCallback::default()))
        .context("failed to attach console callback")?;

    let workflow = eko
        .generate(prompt)
        .await
        .context("failed to generate workflow")?;
    info!(workflow_id = %workflow.id, nodes = workflow.nodes().len(), "workflow ready");
    run_workflow(&eko, workflow).await
}

async fn cmd_generate(config: Option<PathBuf>, prompt: &str, output: Option<PathBuf>) -> Result<()> {
    let eko = build_eko(load_config(config.as_deref())?)?;
    let workflow = eko
        .generate(prompt)
        .await
        .context("failed to generate workflow")?;
    let json = WorkflowParser::serialize(&workflow)?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "workflow saved");
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_execute(config: Option<PathBuf>, file: &std::path::Path) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let eko = build_eko(load_config(config.as_deref())?)?
        .with_callback(Arc::new(ConsoleCallback::default()))
        .context("failed to attach console callback")?;
    let workflow = eko.load(&json).context("failed to load workflow")?;
    run_workflow(&eko, workflow).await
}

fn cmd_validate(file: &std::path::Path) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&json).context("workflow file is not valid JSON")?;

    let result = WorkflowParser::validate(&value);
    if result.valid {
        println!("{}: valid", file.display());
        return Ok(());
    }
    for error in &result.errors {
        eprintln!("  - {error}");
    }
    bail!("{}: {} problem(s) found", file.display(), result.errors.len())
}

fn cmd_schema() -> Result<()> {
    // The console answers every human-input kind, so those are the tools
    // a CLI-run workflow can use.
    let registry = eko_core::ToolRegistry::new();
    for tool in eko_core::tools::human_tools(&ConsoleCallback::default()) {
        registry.register(tool)?;
    }
    println!("{}", serde_json::to_string_pretty(&registry.get_workflow_schema())?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Execute `workflow`, cancelling it on Ctrl-C.
async fn run_workflow(eko: &Eko, workflow: Workflow) -> Result<()> {
    let workflow = Arc::new(workflow);
    let cancel = workflow.cancellation_token();

    let watcher = {
        let workflow = Arc::clone(&workflow);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupt received, cancelling workflow");
                    workflow.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        })
    };

    let outcome = eko.execute(&workflow).await;
    watcher.abort();

    match outcome {
        Ok(result) => {
            print_result(&result);
            if result.is_successful {
                Ok(())
            } else {
                bail!("the workflow reported that the task was not completed")
            }
        }
        Err(e) if e.is_abort() => bail!("workflow cancelled: {e}"),
        Err(e) => Err(e).context("workflow failed"),
    }
}

fn print_result(result: &WorkflowResult) {
    println!();
    println!("{}", if result.is_successful { "Done." } else { "Not completed." });
    println!();
    println!("{}", result.summary);
    if result.payload != result.summary {
        println!();
        println!("{}", result.payload);
    }
}
