//! Dependency-ordered execution of a workflow.
//!
//! Every terminal node is launched concurrently.  A node first awaits all of
//! its dependencies, so a chain runs in sequence while independent branches
//! interleave.  Each node's run is a memoized shared future: a dependency
//! with several dependents executes once and every dependent observes the
//! same result, success or failure.
//!
//! Cancellation is two-level.  The workflow owns a token; every running node
//! gets a child token registered in the workflow's controller map.
//! Cancelling the workflow (or any node calling `abort_all`) signals them
//! all, and the first rejection fails the whole run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared, try_join_all};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::callback::{HookDecision, WorkflowCallback};
use crate::context::{ExecutionContext, IS_SUCCESSFUL_KEY, VariableStore};
use crate::error::{EkoError, Result};
use crate::llm::LlmProvider;
use crate::tools::Tool;
use crate::workflow::summary;
use crate::workflow::{NodeInput, NodeOutput, Workflow, WorkflowNode, WorkflowResult};

type NodeFuture = Shared<BoxFuture<'static, Result<Value>>>;

/// Everything a node run needs, shared by all node futures of one run.
struct RunState {
    workflow_id: String,
    nodes: HashMap<String, Arc<WorkflowNode>>,
    variables: VariableStore,
    llm: Arc<dyn LlmProvider>,
    callback: Option<Arc<dyn WorkflowCallback>>,
    controllers: Arc<DashMap<String, CancellationToken>>,
    workflow_cancel: CancellationToken,
    memo: Mutex<HashMap<String, NodeFuture>>,
}

impl Workflow {
    /// Run every node and summarize the outcome.
    ///
    /// Resolves even when the task logically failed (`is_successful` is then
    /// false).  Structural errors, exhausted model retries and cancellation
    /// reject.
    pub async fn execute(
        &self,
        callback: Option<Arc<dyn WorkflowCallback>>,
    ) -> Result<WorkflowResult> {
        let span = tracing::info_span!("workflow", workflow_id = %self.id);
        self.run(callback).instrument(span).await
    }

    async fn run(&self, callback: Option<Arc<dyn WorkflowCallback>>) -> Result<WorkflowResult> {
        self.validate_dag()?;
        self.log_structure();
        if self.is_cancelled() {
            return Err(EkoError::aborted(format!("workflow `{}` was cancelled", self.id)));
        }

        if let Some(cb) = &callback {
            cb.before_workflow(self).await;
        }

        let state = Arc::new(RunState {
            workflow_id: self.id.clone(),
            nodes: self
                .nodes()
                .iter()
                .map(|n| (n.id.clone(), n.clone()))
                .collect(),
            variables: self.variables().clone(),
            llm: self.llm().clone(),
            callback: callback.clone(),
            controllers: self.controllers().clone(),
            workflow_cancel: self.cancellation_token(),
            memo: Mutex::new(HashMap::new()),
        });

        let terminals = self
            .terminal_nodes()
            .iter()
            .map(|n| node_future(&state, &n.id))
            .collect::<Result<Vec<_>>>()?;
        info!(terminal_nodes = terminals.len(), "executing workflow");

        let started = Instant::now();
        let cancel = self.cancellation_token();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(EkoError::aborted(format!("workflow `{}` was cancelled", self.id)))
            }
            r = try_join_all(terminals) => r,
        };
        if let Err(e) = outcome {
            if e.is_abort() {
                warn!(error = %e, "workflow aborted");
            } else {
                warn!(error = %e, "workflow failed");
            }
            return Err(e);
        }
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "all nodes complete");

        let is_successful = matches!(self.variables().get(IS_SUCCESSFUL_KEY), Some(Value::Bool(true)));
        let summary = summary::summarize(self).await;
        let payload = summary.payload();
        let result = WorkflowResult {
            is_successful,
            summary: summary.summary,
            payload,
        };

        if let Some(cb) = &callback {
            cb.after_workflow(self, &result).await;
        }
        info!(is_successful, "workflow finished");
        Ok(result)
    }
}

/// The memoized run of node `id`.
fn node_future(state: &Arc<RunState>, id: &str) -> Result<NodeFuture> {
    let mut memo = state.memo.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = memo.get(id) {
        return Ok(existing.clone());
    }
    let node = state
        .nodes
        .get(id)
        .cloned()
        .ok_or_else(|| EkoError::NodeNotFound {
            node_id: id.to_owned(),
        })?;
    let future = run_node(state.clone(), node).shared();
    memo.insert(id.to_owned(), future.clone());
    Ok(future)
}

fn run_node(state: Arc<RunState>, node: Arc<WorkflowNode>) -> BoxFuture<'static, Result<Value>> {
    async move {
        let dependencies = node
            .dependencies
            .iter()
            .map(|dep| node_future(&state, dep))
            .collect::<Result<Vec<_>>>()?;
        let outputs = try_join_all(dependencies).await?;

        if state.workflow_cancel.is_cancelled() {
            return Err(EkoError::aborted(format!(
                "workflow cancelled before node `{}` started",
                node.id
            )));
        }

        let input = NodeInput {
            items: node
                .dependencies
                .iter()
                .zip(outputs)
                .map(|(node_id, value)| NodeOutput {
                    node_id: node_id.clone(),
                    value,
                })
                .collect(),
        };

        let cancel = state.workflow_cancel.child_token();
        state.controllers.insert(node.id.clone(), cancel.clone());
        let _registration = ControllerGuard {
            controllers: state.controllers.clone(),
            node_id: node.id.clone(),
        };

        let span = tracing::info_span!("node", node_id = %node.id, name = %node.name);
        execute_node(&state, &node, input, cancel).instrument(span).await
    }
    .boxed()
}

/// Removes a node's cancellation handle when its run ends or is dropped.
struct ControllerGuard {
    controllers: Arc<DashMap<String, CancellationToken>>,
    node_id: String,
}

impl Drop for ControllerGuard {
    fn drop(&mut self) {
        self.controllers.remove(&self.node_id);
    }
}

async fn execute_node(
    state: &RunState,
    node: &WorkflowNode,
    input: NodeInput,
    cancel: CancellationToken,
) -> Result<Value> {
    node.set_input(input.clone());

    let tools: HashMap<String, Arc<dyn Tool>> = node
        .action
        .tools()
        .iter()
        .map(|t| (t.name().to_owned(), t.clone()))
        .collect();
    let ctx = ExecutionContext::new(
        state.workflow_id.clone(),
        node.id.clone(),
        state.variables.clone(),
        Arc::new(tools),
        state.llm.clone(),
        state.callback.clone(),
        cancel,
        state.workflow_cancel.clone(),
    );

    if let Some(cb) = &state.callback {
        match cb.before_subtask(&ctx, node).await {
            HookDecision::Continue => {}
            HookDecision::Skip => {
                info!("node skipped by callback");
                node.set_output(Value::Null)?;
                return Ok(Value::Null);
            }
            HookDecision::AbortAll => {
                ctx.abort_all();
                return Err(EkoError::aborted(format!(
                    "callback aborted the workflow at node `{}`",
                    node.id
                )));
            }
        }
    }
    ctx.check_cancelled()?;

    info!(dependencies = input.items.len(), "node started");
    let started = Instant::now();
    let result = node
        .action
        .execute(&input, &ctx, node.output_schema.as_ref())
        .await?;

    node.set_output(result.output.clone())?;
    node.set_transcript(result.messages);
    debug!(rounds = result.rounds, "node output recorded");

    if let Some(cb) = &state.callback {
        cb.after_subtask(&ctx, node, &result.output).await;
    }
    info!(
        rounds = result.rounds,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "node finished"
    );
    Ok(result.output)
}
