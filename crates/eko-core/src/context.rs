//! Per-node execution context and the workflow variable store.
//!
//! The [`VariableStore`] is shared by every node of one workflow run.  It is
//! backed by [`DashMap`], so individual reads and writes are atomic, but a
//! tool that reads, awaits and then writes must expect other nodes to have
//! written in between.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::callback::WorkflowCallback;
use crate::error::{EkoError, Result};
use crate::llm::LlmProvider;
use crate::tools::Tool;

/// Variable written by `return_output` to report task success.
pub const IS_SUCCESSFUL_KEY: &str = "__isSuccessful__";

/// Bookkeeping key under which `return_output` leaves an action's value.
/// Scoped by node, since several nodes may run actions of the same name.
pub fn action_output_key(node_id: &str, action_name: &str) -> String {
    format!("__action_{node_id}_{action_name}_output")
}

// ---------------------------------------------------------------------------
// Variable store
// ---------------------------------------------------------------------------

/// Shared key/value store for cross-node communication.
///
/// Cheaply cloneable; clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    inner: Arc<DashMap<String, Value>>,
}

impl VariableStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `values`.
    pub fn from_map(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        let store = Self::new();
        for (k, v) in values {
            store.set(k, v);
        }
        store
    }

    /// Read a copy of a value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    /// Write a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        tracing::trace!(key = %key, "variable written");
        self.inner.insert(key, value)
    }

    /// Remove and return a value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Atomically replace the value under `key` with `f(old)`.
    pub fn update(&self, key: &str, f: impl FnOnce(Option<&Value>) -> Value) {
        match self.inner.entry(key.to_owned()) {
            Entry::Occupied(mut e) => {
                let new = f(Some(e.get()));
                e.insert(new);
            }
            Entry::Vacant(e) => {
                e.insert(f(None));
            }
        }
    }

    /// Number of stored variables.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// An ordered copy of every variable.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.inner
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Everything a node's action and tools can reach while the node runs.
///
/// Recreated for every node invocation; never persisted.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Owning workflow id.
    pub workflow_id: String,
    /// The node being executed.
    pub node_id: String,
    /// Workflow-wide variables.
    pub variables: VariableStore,
    /// Tools visible to this node, keyed by name.
    pub tools: Arc<HashMap<String, Arc<dyn Tool>>>,
    /// Model backend.
    pub llm: Arc<dyn LlmProvider>,
    /// Caller hooks, if any.
    pub callback: Option<Arc<dyn WorkflowCallback>>,
    /// This node's cancellation handle.
    cancel: CancellationToken,
    /// The workflow-wide cancellation handle; parent of `cancel`.
    workflow_cancel: CancellationToken,
}

impl ExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow_id: impl Into<String>,
        node_id: impl Into<String>,
        variables: VariableStore,
        tools: Arc<HashMap<String, Arc<dyn Tool>>>,
        llm: Arc<dyn LlmProvider>,
        callback: Option<Arc<dyn WorkflowCallback>>,
        cancel: CancellationToken,
        workflow_cancel: CancellationToken,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            node_id: node_id.into(),
            variables,
            tools,
            llm,
            callback,
            cancel,
            workflow_cancel,
        }
    }

    /// A context outside any workflow, used for standalone actions and
    /// tests.  It owns a fresh cancellation tree.
    pub fn detached(node_id: impl Into<String>, llm: Arc<dyn LlmProvider>) -> Self {
        let workflow_cancel = CancellationToken::new();
        Self::new(
            "detached",
            node_id,
            VariableStore::new(),
            Arc::new(HashMap::new()),
            llm,
            None,
            workflow_cancel.child_token(),
            workflow_cancel,
        )
    }

    /// Escalate to a workflow-wide abort.  Every node's token is signalled.
    pub fn abort_all(&self) {
        tracing::warn!(workflow_id = %self.workflow_id, node_id = %self.node_id, "abort requested for whole workflow");
        self.workflow_cancel.cancel();
    }

    /// Whether this node has been cancelled, directly or through the
    /// workflow.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation checkpoint.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(EkoError::aborted(format!("node `{}` was cancelled", self.node_id)))
        } else {
            Ok(())
        }
    }

    /// The node's cancellation token, for `select!`-ing against long waits.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Look up a tool visible to this node.
    pub fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("workflow_id", &self.workflow_id)
            .field("node_id", &self.node_id)
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("llm", &self.llm.name())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
