//! Eko workflow engine.
//!
//! Turns a natural-language goal into a DAG of sub-tasks and executes it,
//! letting each node's action call tools and the model in a bounded loop
//! until it produces an output.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────┐     ┌──────────────┐
//! │  Generator  │────>│ Workflow │────>│    Action    │
//! │  / Parser   │     │  (DAG)   │     │ (tool loop)  │
//! └─────────────┘     └────┬─────┘     └──────┬───────┘
//!                          │                  │
//!                   ┌──────┴──────┐    ┌──────┴───────┐
//!                   │  Callbacks  │    │ Tools / LLM  │
//!                   └─────────────┘    │ Compression  │
//!                                      └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`llm`] -- Provider capability, vendor clients, streaming, wire types.
//! - [`tools`] -- Tool trait, registry and built-in tools.
//! - [`compression`] -- History compression between action rounds.
//! - [`action`] -- The per-node tool-use loop.
//! - [`workflow`] -- DAG structure, execution and summary.
//! - [`parser`] / [`generator`] -- Workflow documents in and out.
//! - [`eko`] -- The facade tying everything together.
//! - [`config`] / [`error`] -- Configuration and error types.

pub mod action;
pub mod callback;
pub mod compression;
pub mod config;
pub mod context;
pub mod eko;
pub mod error;
pub mod generator;
pub mod llm;
pub mod parser;
pub mod tools;
pub mod workflow;

pub use action::{Action, ActionResult, ActionType};
pub use callback::{HookDecision, HumanInputKind, WorkflowCallback};
pub use compression::{ContextCompressor, NoCompress, SummaryCompress};
pub use config::{ActionConfig, CompressionConfig, EkoConfig, GeneratorConfig, LlmSection, ProviderKind};
pub use context::{ExecutionContext, VariableStore};
pub use eko::Eko;
pub use error::{EkoError, Result};
pub use generator::WorkflowGenerator;
pub use llm::{
    LlmClient, LlmClientConfig, LlmParams, LlmProvider, LlmResponse, Message, ProviderSpec,
    ScriptedProvider, ToolCall, ToolChoice, ToolDefinition,
};
pub use parser::{ValidationResult, WorkflowDocument, WorkflowParser};
pub use tools::{Tool, ToolRegistry};
pub use workflow::{NodeInput, NodeOutput, Workflow, WorkflowNode, WorkflowResult};
