//! Engine error types.
//!
//! All engine subsystems surface errors through [`EkoError`].  Variants are
//! grouped by how callers are expected to react: structural errors are fatal
//! and never retried, LLM errors are transient, tool errors are fed back to
//! the model, and [`EkoError::Aborted`] marks cooperative cancellation.
//!
//! The enum is `Clone` so that a node's failure can be observed by every
//! dependent node awaiting it.

/// Unified error type for the workflow engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EkoError {
    // -- LLM errors ----------------------------------------------------------
    /// An HTTP request to the LLM provider failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The LLM response could not be parsed into the expected format.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The streaming SSE connection was interrupted or produced invalid data.
    #[error("llm stream error: {reason}")]
    LlmStreamError { reason: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    /// A model call kept failing after every retry was spent.
    #[error("llm call failed after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    // -- Tool errors ---------------------------------------------------------
    /// The requested tool is not registered.
    #[error("tool not found: {tool_name}")]
    ToolNotFound { tool_name: String },

    /// A tool with the same name is already registered.
    #[error("tool already registered: {tool_name}")]
    DuplicateTool { tool_name: String },

    /// Raised by a tool implementation.  The message is shown to the model
    /// verbatim, prefixed with `Error: `.
    #[error("{0}")]
    ToolFailed(String),

    /// Tool input did not satisfy the tool's input schema.
    #[error("invalid input for tool `{tool_name}`: {reason}")]
    InvalidToolInput { tool_name: String, reason: String },

    // -- Workflow structure --------------------------------------------------
    /// A workflow document failed validation.  All problems are collected.
    #[error("invalid workflow: {}", errors.join("; "))]
    InvalidWorkflow { errors: Vec<String> },

    /// The node dependency graph contains a cycle through `node_id`.
    #[error("workflow has a circular dependency at node `{node_id}`")]
    CyclicDependency { node_id: String },

    /// A referenced node id does not exist in the workflow.
    #[error("node not found: {node_id}")]
    NodeNotFound { node_id: String },

    /// A node with the same id already exists in the workflow.
    #[error("duplicate node id: {node_id}")]
    DuplicateNode { node_id: String },

    /// The node cannot be removed while other nodes depend on it.
    #[error("node `{node_id}` is a dependency of {}", dependents.join(", "))]
    NodeHasDependents {
        node_id: String,
        dependents: Vec<String>,
    },

    /// The node output slot was already written.
    #[error("node `{node_id}` has already been executed")]
    AlreadyExecuted { node_id: String },

    // -- Cancellation --------------------------------------------------------
    /// Execution was cancelled cooperatively.
    #[error("Abort: {reason}")]
    Aborted { reason: String },

    // -- Ambient -------------------------------------------------------------
    /// Configuration loading or validation failed.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(String),

    /// File system error.
    #[error("io error: {0}")]
    Io(String),

    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EkoError>;

impl EkoError {
    /// Build the error a tool raises to report a failure to the model.
    pub fn tool(message: impl Into<String>) -> Self {
        Self::ToolFailed(message.into())
    }

    /// Build a cancellation error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Whether this error marks cancellation rather than failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Whether a model call that produced this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LlmRequestFailed { .. } | Self::LlmParseFailed { .. } | Self::LlmStreamError { .. }
        )
    }
}

impl From<serde_json::Error> for EkoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for EkoError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for EkoError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for EkoError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_displays_bare_message() {
        let err = EkoError::tool("boom");
        assert_eq!(format!("Error: {err}"), "Error: boom");
    }

    #[test]
    fn abort_is_distinguished() {
        let err = EkoError::aborted("workflow cancelled");
        assert!(err.is_abort());
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("Abort"));
    }

    #[test]
    fn only_llm_errors_are_retryable() {
        assert!(EkoError::LlmStreamError { reason: "eof".into() }.is_retryable());
        assert!(EkoError::LlmRequestFailed { reason: "503".into() }.is_retryable());
        assert!(!EkoError::CyclicDependency { node_id: "a".into() }.is_retryable());
        assert!(!EkoError::tool("boom").is_retryable());
    }

    #[test]
    fn invalid_workflow_joins_errors() {
        let err = EkoError::InvalidWorkflow {
            errors: vec!["missing id".into(), "nodes must be an array".into()],
        };
        assert_eq!(
            err.to_string(),
            "invalid workflow: missing id; nodes must be an array"
        );
    }
}
