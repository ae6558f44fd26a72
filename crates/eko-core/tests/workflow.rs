//! Integration tests for DAG execution, hooks, cancellation and the
//! summary step.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use eko_core::{
    Action, ActionType, EkoError, HookDecision, LlmProvider, LlmResponse, ScriptedProvider, Tool,
    Workflow, WorkflowNode,
};

use common::*;

/// Every action returns `"<step> output"` on its first round; summary
/// requests get a text reply.
fn returning_provider() -> ScriptedProvider {
    ScriptedProvider::new().with_responder(|messages, params| {
        if is_summary_request(params) {
            return Ok(LlmResponse::text("All steps finished."));
        }
        let step = step_of(messages);
        Ok(respond(vec![return_output(
            &format!("{step}-ret"),
            true,
            json!(format!("{step} output")),
        )]))
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  Ordering
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn fan_out_runs_shared_dependency_once() {
    let llm = returning_provider();
    let wf = workflow(
        Arc::new(llm.clone()),
        &[("a", &[]), ("b", &["a"]), ("c", &["a"])],
        Vec::new(),
    );
    let callback = Arc::new(RecordingCallback::default());

    let result = wf.execute(Some(callback.clone())).await.unwrap();
    assert!(result.is_successful);
    assert_eq!(result.summary, "All steps finished.");
    assert_eq!(result.payload, "All steps finished.");

    let events = callback.events();
    assert_eq!(events.iter().filter(|e| *e == "start:a").count(), 1);
    let pos = |e: &str| events.iter().position(|x| x == e).unwrap();
    assert!(pos("end:a") < pos("start:b"));
    assert!(pos("end:a") < pos("start:c"));
    assert_eq!(events.first().map(String::as_str), Some("workflow-start:wf-test"));
    assert_eq!(events.last().map(String::as_str), Some("workflow-end:wf-test"));

    // One request per node plus the summary, which comes last.
    let requests = llm.requests();
    assert_eq!(requests.len(), 4);
    assert!(is_summary_request(&requests[3].params));
    assert_eq!(requests.iter().filter(|r| step_of(&r.messages) == "a").count(), 1);

    let b = wf.get_node("b").unwrap();
    let input = b.input().unwrap();
    assert_eq!(input.items.len(), 1);
    assert_eq!(input.items[0].node_id, "a");
    assert_eq!(input.items[0].value, json!("a output"));
    assert_eq!(b.output(), Some(&json!("b output")));
}

#[tokio::test]
async fn inputs_follow_dependency_order() {
    let llm = returning_provider();
    let wf = workflow(
        Arc::new(llm.clone()),
        &[("a", &[]), ("b", &[]), ("c", &["b", "a"])],
        Vec::new(),
    );
    wf.execute(None).await.unwrap();

    let input = wf.get_node("c").unwrap().input().unwrap().clone();
    let ids: Vec<_> = input.items.iter().map(|i| i.node_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);

    let c_prompt = llm
        .requests()
        .into_iter()
        .find(|r| step_of(&r.messages) == "c")
        .unwrap()
        .messages[1]
        .text();
    assert!(c_prompt.contains("## b\nb output"));
    assert!(c_prompt.find("## b").unwrap() < c_prompt.find("## a").unwrap());
}

#[tokio::test]
async fn cyclic_workflow_is_refused_before_any_call() {
    let llm = returning_provider();
    let wf = workflow(Arc::new(llm.clone()), &[("a", &["b"]), ("b", &["a"])], Vec::new());
    let err = wf.execute(None).await.unwrap_err();
    assert!(matches!(err, EkoError::CyclicDependency { .. }));
    assert!(llm.requests().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Variables and success flag
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn context_written_by_one_node_is_visible_to_the_next() {
    let llm = ScriptedProvider::new().with_responder(|messages, params| {
        if is_summary_request(params) {
            return Ok(LlmResponse::text("done"));
        }
        let step = step_of(messages);
        let response = match (step.as_str(), rounds_done(messages)) {
            ("a", 0) => respond(vec![call(
                "a-1",
                "write_context",
                json!({"key": "city", "value": "Paris"}),
            )]),
            _ => respond(vec![return_output(&format!("{step}-ret"), true, json!("ok"))]),
        };
        Ok(response)
    });
    let wf = workflow(Arc::new(llm.clone()), &[("a", &[]), ("b", &["a"])], Vec::new());
    wf.execute(None).await.unwrap();

    assert_eq!(wf.variables().get("city"), Some(json!("Paris")));
    let b_prompt = llm
        .requests()
        .into_iter()
        .find(|r| step_of(&r.messages) == "b")
        .unwrap()
        .messages[1]
        .text();
    assert!(b_prompt.contains("- city: Paris"));
    // Bookkeeping keys are consumed.
    assert!(!wf.variables().contains("__action_a_a_output"));
}

#[tokio::test]
async fn one_unsuccessful_node_marks_the_run_unsuccessful() {
    let llm = ScriptedProvider::new().with_responder(|messages, params| {
        if is_summary_request(params) {
            return Ok(LlmResponse::text("partial"));
        }
        let step = step_of(messages);
        Ok(respond(vec![return_output("r", step != "b", json!(null))]))
    });
    let wf = workflow(Arc::new(llm), &[("a", &[]), ("b", &["a"]), ("c", &["b"])], Vec::new());
    let result = wf.execute(None).await.unwrap();
    assert!(!result.is_successful);
    assert_eq!(wf.variables().get("__isSuccessful__"), Some(json!(false)));
}

#[tokio::test]
async fn document_tasks_return_the_document_as_payload() {
    let llm = ScriptedProvider::new().with_responder(|messages, params| {
        if is_summary_request(params) {
            return Ok(respond(vec![eko_core::ToolCall {
                id: "s".into(),
                name: "summarize_workflow".into(),
                arguments: json!({
                    "summary": "Wrote the report.",
                    "isDocumentGenerationTask": true,
                    "document": "# Report"
                }),
            }]));
        }
        Ok(respond(vec![return_output(&step_of(messages), true, json!("x"))]))
    });
    let wf = workflow(Arc::new(llm), &[("a", &[])], Vec::new());
    let result = wf.execute(None).await.unwrap();
    assert_eq!(result.summary, "Wrote the report.");
    assert_eq!(result.payload, "# Report");
}

// ═══════════════════════════════════════════════════════════════════════
//  Hooks
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn skipped_node_outputs_null_and_dependents_still_run() {
    let llm = returning_provider();
    let wf = workflow(Arc::new(llm.clone()), &[("a", &[]), ("b", &["a"])], Vec::new());
    let callback = Arc::new(RecordingCallback::default().with_decision("a", HookDecision::Skip));

    wf.execute(Some(callback)).await.unwrap();
    assert_eq!(wf.get_node("a").unwrap().output(), Some(&json!(null)));
    assert_eq!(wf.get_node("b").unwrap().output(), Some(&json!("b output")));
    assert!(llm.requests().iter().all(|r| step_of(&r.messages) != "a"));
}

#[tokio::test]
async fn abort_all_from_a_hook_rejects_the_run() {
    let llm = returning_provider();
    let wf = workflow(Arc::new(llm), &[("a", &[]), ("b", &["a"])], Vec::new());
    let callback = Arc::new(RecordingCallback::default().with_decision("a", HookDecision::AbortAll));

    let err = wf.execute(Some(callback)).await.unwrap_err();
    assert!(err.is_abort());
    assert!(wf.is_cancelled());
    assert!(wf.get_node("b").unwrap().output().is_none());
}

#[tokio::test]
async fn user_side_prompts_reach_the_callback() {
    let llm = returning_provider();
    let wf = workflow(Arc::new(llm), &[("a", &[])], Vec::new());
    let callback = Arc::new(RecordingCallback::default());
    wf.execute(Some(callback.clone())).await.unwrap();
    assert!(callback.events().contains(&"say:return_output:Working on it".to_string()));
}

// ═══════════════════════════════════════════════════════════════════════
//  Interleaved siblings
// ═══════════════════════════════════════════════════════════════════════

/// Parallel nodes `b` and `c` whose actions are both named `shared`,
/// plus `d` depending on both.
fn shared_name_workflow(llm: Arc<dyn LlmProvider>) -> Workflow {
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(NapTool)];
    let node = |id: &str| {
        let action = Action::new(
            ActionType::Prompt,
            "shared",
            format!("Handle part {id}"),
            tools.clone(),
            fast_config(),
        );
        WorkflowNode::new(id, action)
    };
    let mut wf = Workflow::new("wf-shared", "Shared action names", llm);
    wf.add_node(node("b")).unwrap();
    wf.add_node(node("c")).unwrap();
    wf.add_node(node("d").with_dependencies(["b", "c"])).unwrap();
    wf
}

#[tokio::test(start_paused = true)]
async fn same_action_name_in_parallel_nodes_keeps_outputs_apart() {
    let llm = ScriptedProvider::new().with_responder(|messages, params| {
        if is_summary_request(params) {
            return Ok(LlmResponse::text("done"));
        }
        let task = task_of(messages);
        let response = if task.contains("Handle part b") {
            match rounds_done(messages) {
                // Returns, then keeps the round open across a long await.
                0 => respond(vec![
                    return_output("b-ret", true, json!("B output")),
                    call("b-nap", "nap", json!({"ms": 100})),
                ]),
                _ => respond(vec![return_output("b-ret-2", true, json!("B second"))]),
            }
        } else if task.contains("Handle part c") {
            match rounds_done(messages) {
                0 => respond(vec![call("c-nap", "nap", json!({"ms": 10}))]),
                _ => respond(vec![return_output("c-ret", true, json!("C output"))]),
            }
        } else {
            respond(vec![return_output("d-ret", true, json!("D output"))])
        };
        Ok(response)
    });
    let wf = shared_name_workflow(Arc::new(llm.clone()));

    let result = wf.execute(None).await.unwrap();
    assert!(result.is_successful);
    assert_eq!(wf.get_node("b").unwrap().output(), Some(&json!("B output")));
    assert_eq!(wf.get_node("c").unwrap().output(), Some(&json!("C output")));

    let b_requests = llm
        .requests()
        .into_iter()
        .filter(|r| task_of(&r.messages).contains("Handle part b"))
        .count();
    assert_eq!(b_requests, 1);

    let d_input = wf.get_node("d").unwrap().input().unwrap().clone();
    assert_eq!(d_input.items[0].value, json!("B output"));
    assert_eq!(d_input.items[1].value, json!("C output"));
    assert!(wf.variables().snapshot().keys().all(|k| !k.starts_with("__action_")));
}

#[tokio::test(start_paused = true)]
async fn context_writes_interleave_across_tool_awaits() {
    let llm = ScriptedProvider::new().with_responder(|messages, params| {
        if is_summary_request(params) {
            return Ok(LlmResponse::text("done"));
        }
        let task = task_of(messages);
        let (part, nap) = if task.contains("Handle part b") {
            ("b", 30)
        } else if task.contains("Handle part c") {
            ("c", 5)
        } else {
            ("d", 0)
        };
        let response = match (part, rounds_done(messages)) {
            ("d", _) => respond(vec![return_output("d-ret", true, json!(task))]),
            (_, 0) => respond(vec![call(&format!("{part}-nap"), "nap", json!({"ms": nap}))]),
            (_, 1) => respond(vec![call(
                &format!("{part}-write"),
                "write_context",
                json!({"key": "last_writer", "value": part}),
            )]),
            (_, 2) => respond(vec![call(
                &format!("{part}-own"),
                "write_context",
                json!({"key": format!("result_{part}"), "value": part}),
            )]),
            _ => respond(vec![return_output(&format!("{part}-ret"), true, json!(part))]),
        };
        Ok(response)
    });
    let wf = shared_name_workflow(Arc::new(llm));

    wf.execute(None).await.unwrap();

    // c woke first, so b overwrote the shared key after it.
    assert_eq!(wf.variables().get("last_writer"), Some(json!("b")));
    assert_eq!(wf.variables().get("result_b"), Some(json!("b")));
    assert_eq!(wf.variables().get("result_c"), Some(json!("c")));
    assert_eq!(wf.get_node("b").unwrap().output(), Some(&json!("b")));
    assert_eq!(wf.get_node("c").unwrap().output(), Some(&json!("c")));

    // d starts after both and sees every write.
    let d_output = wf.get_node("d").unwrap().output().unwrap().clone();
    let d_task = d_output.as_str().unwrap();
    assert!(d_task.contains("- result_b: b"));
    assert!(d_task.contains("- result_c: c"));
    assert!(d_task.contains("- last_writer: b"));
}

// ═══════════════════════════════════════════════════════════════════════
//  Cancellation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn cancel_rejects_running_and_waiting_nodes() {
    let llm = ScriptedProvider::new().with_responder(|messages, _params| {
        let step = step_of(messages);
        Ok(respond(vec![call(&format!("{step}-1"), "slow", json!({}))]))
    });
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(SlowTool)];
    let wf = Arc::new(workflow(
        Arc::new(llm.clone()),
        &[("a", &[]), ("b", &["a"])],
        tools,
    ));

    let handle = {
        let wf = wf.clone();
        tokio::spawn(async move { wf.execute(None).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(wf.running_nodes(), vec!["a".to_string()]);
    wf.cancel();

    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("execute must not hang after cancel")
        .unwrap();
    let err = result.unwrap_err();
    assert!(err.is_abort(), "unexpected error: {err}");
    assert!(wf.get_node("a").unwrap().output().is_none());
    assert!(wf.get_node("b").unwrap().output().is_none());
    assert!(wf.running_nodes().is_empty());
    assert_eq!(llm.requests().len(), 1);
}

#[tokio::test]
async fn cancelled_workflow_does_not_start() {
    let llm = returning_provider();
    let provider: Arc<dyn LlmProvider> = Arc::new(llm.clone());
    let wf = workflow(provider, &[("a", &[])], Vec::new());
    wf.cancel();
    assert!(wf.execute(None).await.unwrap_err().is_abort());
    assert!(llm.requests().is_empty());
}

#[tokio::test]
async fn exhausted_retries_fail_the_run() {
    let llm = ScriptedProvider::new().with_responder(|_, _| {
        Err(EkoError::LlmRequestFailed {
            reason: "connection reset".into(),
        })
    });
    let wf = workflow(Arc::new(llm.clone()), &[("a", &[]), ("b", &["a"])], Vec::new());
    let err = wf.execute(None).await.unwrap_err();
    assert!(matches!(err, EkoError::RetriesExhausted { attempts: 4, .. }));
    assert!(!err.is_abort());
    // Node b never asked the model.
    assert!(llm.requests().iter().all(|r| step_of(&r.messages) == "a"));
}
