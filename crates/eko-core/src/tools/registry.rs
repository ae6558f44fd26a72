//! Tool registry.
//!
//! Holds every tool the workflow generator may reference and the parser may
//! resolve.  Backed by [`DashMap`] so it can be shared across tasks without
//! a global lock.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Value, json};

use crate::error::{EkoError, Result};
use crate::llm::ToolDefinition;
use crate::tools::Tool;

/// Concurrent tool registry.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    inner: Arc<DashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  Fails if the name is taken.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_owned();
        match self.inner.entry(name.clone()) {
            Entry::Occupied(_) => Err(EkoError::DuplicateTool { tool_name: name }),
            Entry::Vacant(slot) => {
                slot.insert(tool);
                tracing::info!(tool = %name, "tool registered");
                Ok(())
            }
        }
    }

    /// Remove a tool.  Fails if no tool has that name.
    pub fn unregister(&self, name: &str) -> Result<Arc<dyn Tool>> {
        let (_, tool) = self
            .inner
            .remove(name)
            .ok_or_else(|| EkoError::ToolNotFound {
                tool_name: name.to_owned(),
            })?;
        tracing::info!(tool = %name, "tool unregistered");
        Ok(tool)
    }

    /// Resolve a tool by name.
    pub fn get_tool(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.inner
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EkoError::ToolNotFound {
                tool_name: name.to_owned(),
            })
    }

    /// Whether every name in `names` is registered.
    pub fn has_tools<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().all(|n| self.inner.contains_key(n.as_ref()))
    }

    /// Registered tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Definitions of every registered tool, sorted by name.
    pub fn get_tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.inner.iter().map(|e| e.value().definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// JSON Schema of a workflow document whose actions may only reference
    /// registered tools.
    pub fn get_workflow_schema(&self) -> Value {
        let names = self.tool_names();
        let tool_item = if names.is_empty() {
            json!({"type": "string"})
        } else {
            json!({"type": "string", "enum": names})
        };

        json!({
            "type": "object",
            "required": ["id", "name", "nodes"],
            "properties": {
                "id": {"type": "string", "description": "Workflow id"},
                "name": {"type": "string", "description": "Short workflow name"},
                "description": {"type": "string"},
                "nodes": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "required": ["id", "action"],
                        "properties": {
                            "id": {"type": "string", "description": "Unique node id"},
                            "name": {"type": "string"},
                            "description": {"type": "string"},
                            "dependencies": {
                                "type": "array",
                                "items": {"type": "string"},
                                "description": "Ids of nodes whose output this node needs"
                            },
                            "action": {
                                "type": "object",
                                "required": ["type", "name", "description", "tools"],
                                "properties": {
                                    "type": {"type": "string", "enum": ["prompt", "script", "hybrid"]},
                                    "name": {"type": "string"},
                                    "description": {
                                        "type": "string",
                                        "description": "Detailed instructions for this step"
                                    },
                                    "tools": {"type": "array", "items": tool_item}
                                }
                            },
                            "output": {
                                "type": "object",
                                "description": "Optional JSON Schema of the node output"
                            }
                        }
                    }
                },
                "variables": {"type": "object"}
            }
        })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}
