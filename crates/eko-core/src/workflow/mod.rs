//! Workflows -- DAGs of nodes, each fulfilled by an action.
//!
//! - [`node`] -- Nodes and the values passed between them.
//! - [`engine`] -- Dependency-ordered concurrent execution.
//! - [`summary`] -- The post-run summary step.

pub mod engine;
pub mod node;
pub mod summary;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::VariableStore;
use crate::error::{EkoError, Result};
use crate::llm::LlmProvider;

pub use node::{NodeInput, NodeOutput, WorkflowNode};

/// What a workflow run resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Whether the task was accomplished, as reported by the actions.
    pub is_successful: bool,
    /// Natural-language summary of the run.
    pub summary: String,
    /// The generated document for document tasks, otherwise the summary.
    pub payload: String,
}

/// A DAG of nodes sharing one variable store.
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: String,
    nodes: Vec<Arc<WorkflowNode>>,
    variables: VariableStore,
    llm: Arc<dyn LlmProvider>,
    /// Live per-node cancellation handles, keyed by node id.
    controllers: Arc<DashMap<String, CancellationToken>>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.nodes.iter().map(|n| n.id.as_str()).collect::<Vec<_>>())
            .field("llm", &self.llm.name())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            variables: VariableStore::new(),
            llm,
            controllers: Arc::new(DashMap::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Seed the variable store.
    pub fn with_variables(self, variables: impl IntoIterator<Item = (String, Value)>) -> Self {
        for (key, value) in variables {
            self.variables.set(key, value);
        }
        self
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    /// Append a node.  Fails if the id is already taken.
    pub fn add_node(&mut self, node: WorkflowNode) -> Result<()> {
        if self.nodes.iter().any(|n| n.id == node.id) {
            return Err(EkoError::DuplicateNode { node_id: node.id });
        }
        self.nodes.push(Arc::new(node));
        Ok(())
    }

    pub fn get_node(&self, id: &str) -> Result<&Arc<WorkflowNode>> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| EkoError::NodeNotFound {
                node_id: id.to_owned(),
            })
    }

    /// Remove a node nothing depends on.
    pub fn remove_node(&mut self, id: &str) -> Result<Arc<WorkflowNode>> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| EkoError::NodeNotFound {
                node_id: id.to_owned(),
            })?;

        let dependents: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.dependencies.iter().any(|d| d == id))
            .map(|n| n.id.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(EkoError::NodeHasDependents {
                node_id: id.to_owned(),
                dependents,
            });
        }

        Ok(self.nodes.remove(index))
    }

    pub fn nodes(&self) -> &[Arc<WorkflowNode>] {
        &self.nodes
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    /// Nodes no other node depends on, in declaration order.
    pub fn terminal_nodes(&self) -> Vec<Arc<WorkflowNode>> {
        let depended_on: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.dependencies.iter().map(String::as_str))
            .collect();
        self.nodes
            .iter()
            .filter(|n| !depended_on.contains(n.id.as_str()))
            .cloned()
            .collect()
    }

    /// Check that every dependency exists and the graph is acyclic.
    pub fn validate_dag(&self) -> Result<()> {
        let by_id: HashMap<&str, &WorkflowNode> =
            self.nodes.iter().map(|n| (n.id.as_str(), n.as_ref())).collect();

        for node in &self.nodes {
            for dep in &node.dependencies {
                if !by_id.contains_key(dep.as_str()) {
                    return Err(EkoError::NodeNotFound {
                        node_id: dep.clone(),
                    });
                }
            }
        }

        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        for node in &self.nodes {
            if let Some(node_id) = find_cycle(node.id.as_str(), &by_id, &mut visited, &mut on_stack) {
                return Err(EkoError::CyclicDependency {
                    node_id: node_id.to_owned(),
                });
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Cancel the run.  Every live node handle is signalled.
    pub fn cancel(&self) {
        warn!(workflow_id = %self.id, live_nodes = self.controllers.len(), "cancelling workflow");
        for entry in self.controllers.iter() {
            entry.value().cancel();
        }
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// A handle that cancels this workflow, for use from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Ids of nodes currently running.
    pub fn running_nodes(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.controllers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub(crate) fn controllers(&self) -> &Arc<DashMap<String, CancellationToken>> {
        &self.controllers
    }

    pub(crate) fn log_structure(&self) {
        info!(
            workflow_id = %self.id,
            nodes = self.nodes.len(),
            terminal = self.terminal_nodes().len(),
            "workflow structure validated"
        );
    }
}

/// Depth-first search with a recursion stack.  Returns the node at which a
/// cycle closes.
fn find_cycle<'a>(
    id: &'a str,
    by_id: &HashMap<&'a str, &'a WorkflowNode>,
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
    if let Some(node) = by_id.get(id) {
        for dep in &node.dependencies {
            if let Some(found) = find_cycle(dep.as_str(), by_id, visited, on_stack) {
                return Some(found);
            }
        }
    }
    on_stack.remove(id);
    None
}
