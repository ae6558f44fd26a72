//! Integration tests for the per-node tool-use loop.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use eko_core::action::prompt::{FINALIZE_NO_TOOL, FINALIZE_STEP_BUDGET};
use eko_core::compression::{ContextCompressor, SummaryCompress};
use eko_core::llm::{ContentBlock, Role, validate_tool_pairing};
use eko_core::{
    Action, ActionConfig, ActionType, EkoError, ExecutionContext, LlmResponse, NodeInput,
    ScriptedProvider, Tool, ToolChoice,
};

use common::*;

fn run_ctx(llm: &ScriptedProvider) -> ExecutionContext {
    ExecutionContext::detached("node-1", Arc::new(llm.clone()))
}

// ═══════════════════════════════════════════════════════════════════════
//  Termination
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn return_output_ends_the_loop() {
    let llm = ScriptedProvider::with_responses([respond(vec![return_output(
        "r1",
        true,
        json!({"temp": 21}),
    )])]);
    let ctx = run_ctx(&llm);
    let result = action("fetch", Vec::new())
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap();

    assert_eq!(result.output, json!({"temp": 21}));
    assert_eq!(result.rounds, 1);
    assert_eq!(ctx.variables.get("__isSuccessful__"), Some(json!(true)));
    assert!(ctx.variables.get(&format!("__action_{}_fetch_output", ctx.node_id)).is_none());

    // Both injected tools are offered, wrapped in the envelope.
    let params = &llm.requests()[0].params;
    let names: Vec<_> = params.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["write_context", "return_output"]);
    assert!(params.tools[1].input_schema["properties"]["toolCall"].is_object());
    assert_eq!(params.tool_choice, Some(ToolChoice::Auto));
}

#[tokio::test]
async fn text_reply_forces_exactly_one_finalize_round() {
    let llm = ScriptedProvider::with_responses([
        LlmResponse::text("I believe the answer is 42."),
        respond(vec![return_output("r1", true, json!(42))]),
    ]);
    let ctx = run_ctx(&llm);
    let result = action("answer", vec![Arc::new(EchoTool) as Arc<dyn Tool>])
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap();

    assert_eq!(result.output, json!(42));
    assert_eq!(result.rounds, 2);

    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.streamed));
    let finalize = &requests[1];
    assert!(is_finalize_request(&finalize.params));
    assert_eq!(finalize.params.tools.len(), 1);
    assert_eq!(finalize.params.tools[0].name, "return_output");
    assert_eq!(finalize.messages.last().unwrap().text(), FINALIZE_NO_TOOL);
}

#[tokio::test]
async fn missing_return_output_after_finalize_yields_null_and_failure() {
    let llm = ScriptedProvider::with_responses([
        LlmResponse::text("thinking"),
        LlmResponse::text("still thinking"),
    ]);
    let ctx = run_ctx(&llm);
    let result = action("answer", Vec::new())
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap();

    assert_eq!(result.output, json!(null));
    assert_eq!(result.rounds, 2);
    assert_eq!(llm.requests().len(), 2);
    assert_eq!(ctx.variables.get("__isSuccessful__"), Some(json!(false)));
}

#[tokio::test]
async fn step_budget_triggers_best_effort_finalization() {
    let llm = ScriptedProvider::new().with_responder(|messages, params| {
        if is_finalize_request(params) {
            return Ok(respond(vec![return_output("fin", false, json!("best effort"))]));
        }
        let round = rounds_done(messages);
        Ok(respond(vec![call(&format!("e{round}"), "echo", json!({"text": "again"}))]))
    });
    let ctx = run_ctx(&llm);
    let config = ActionConfig {
        max_rounds: 2,
        ..fast_config()
    };
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool)];
    let result = Action::new(ActionType::Prompt, "loop", "Loop forever", tools, config)
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap();

    assert_eq!(result.output, json!("best effort"));
    assert_eq!(result.rounds, 3);
    let requests = llm.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].messages.last().unwrap().text(), FINALIZE_STEP_BUDGET);
    assert_eq!(ctx.variables.get("__isSuccessful__"), Some(json!(false)));
    assert!(validate_tool_pairing(&result.messages).is_ok());
}

// ═══════════════════════════════════════════════════════════════════════
//  Tool results
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn failing_tool_becomes_error_result_and_loop_continues() {
    let llm = ScriptedProvider::with_responses([
        respond(vec![call("x1", "explode", json!({}))]),
        respond(vec![return_output("r1", false, json!("gave up"))]),
    ]);
    let ctx = run_ctx(&llm);
    let result = action("risky", vec![Arc::new(ExplodingTool) as Arc<dyn Tool>])
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap();

    assert_eq!(result.output, json!("gave up"));
    let tool_message = result
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(
        tool_message.blocks(),
        vec![ContentBlock::ToolResult {
            tool_use_id: "x1".into(),
            content: vec![ContentBlock::text("Error: boom")],
            is_error: true,
        }]
    );
    // The model saw the error before its second turn.
    let second = &llm.requests()[1].messages;
    assert!(second.last().unwrap().to_display_text().contains("Error: boom"));
}

#[tokio::test]
async fn unknown_tool_and_bad_input_are_reported_to_the_model() {
    let llm = ScriptedProvider::with_responses([
        respond(vec![
            call("u1", "teleport", json!({})),
            call("u2", "echo", json!({"wrong": 1})),
        ]),
        respond(vec![return_output("r1", true, json!("ok"))]),
    ]);
    let ctx = run_ctx(&llm);
    let result = action("a", vec![Arc::new(EchoTool) as Arc<dyn Tool>])
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap();

    let results = result.messages.iter().find(|m| m.role == Role::Tool).unwrap().blocks();
    assert_eq!(results.len(), 2);
    for block in &results {
        assert!(matches!(block, ContentBlock::ToolResult { is_error: true, .. }));
    }
    let text = results[0].to_display_text();
    assert!(text.contains("tool not found: teleport"), "{text}");
    assert!(results[1].to_display_text().contains("invalid input for tool `echo`"));
}

#[tokio::test]
async fn use_tool_result_returns_last_tool_output() {
    let llm = ScriptedProvider::with_responses([
        respond(vec![call("e1", "echo", json!({"text": "a very long page"}))]),
        respond(vec![call(
            "r1",
            "return_output",
            json!({"isSuccessful": true, "use_tool_result": true}),
        )]),
    ]);
    let ctx = run_ctx(&llm);
    let result = action("read", vec![Arc::new(EchoTool) as Arc<dyn Tool>])
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap();

    assert_eq!(result.output, json!({"echo": "a very long page"}));
}

#[tokio::test]
async fn transcript_orders_text_tool_use_then_result() {
    let mut first = respond(vec![call("e1", "echo", json!({"text": "hi"}))]);
    first.text_content = Some("Let me echo.".into());
    let llm = ScriptedProvider::with_responses([
        first,
        respond(vec![return_output("r1", true, json!("hi"))]),
    ]);
    let ctx = run_ctx(&llm);
    let result = action("echoer", vec![Arc::new(EchoTool) as Arc<dyn Tool>])
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap();

    let assistant = &result.messages[2];
    assert_eq!(assistant.role, Role::Assistant);
    let blocks = assistant.blocks();
    assert_eq!(blocks[0], ContentBlock::text("Let me echo."));
    assert!(matches!(&blocks[1], ContentBlock::ToolUse { id, .. } if id == "e1"));
    assert_eq!(result.messages[3].role, Role::Tool);
    assert!(validate_tool_pairing(&result.messages).is_ok());
}

// ═══════════════════════════════════════════════════════════════════════
//  Retries and cancellation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried() {
    let llm = ScriptedProvider::new();
    llm.push_error(EkoError::LlmStreamError {
        reason: "connection closed".into(),
    });
    llm.push_response(respond(vec![return_output("r1", true, json!("ok"))]));
    let ctx = run_ctx(&llm);
    let config = ActionConfig::default();
    let result = Action::new(ActionType::Prompt, "a", "d", Vec::new(), config)
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap();

    assert_eq!(result.output, json!("ok"));
    assert_eq!(llm.requests().len(), 2);
}

#[tokio::test]
async fn retries_are_bounded() {
    let llm = ScriptedProvider::new();
    for _ in 0..2 {
        llm.push_error(EkoError::LlmRequestFailed {
            reason: "503".into(),
        });
    }
    let ctx = run_ctx(&llm);
    let config = ActionConfig {
        max_retries: 1,
        ..fast_config()
    };
    let err = Action::new(ActionType::Prompt, "a", "d", Vec::new(), config)
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap_err();

    assert!(matches!(err, EkoError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(llm.requests().len(), 2);
}

#[tokio::test]
async fn non_transient_errors_are_not_retried() {
    let llm = ScriptedProvider::new();
    llm.push_error(EkoError::MissingApiKey {
        provider: "anthropic".into(),
    });
    let ctx = run_ctx(&llm);
    let err = action("a", Vec::new())
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EkoError::MissingApiKey { .. }));
    assert_eq!(llm.requests().len(), 1);
}

#[tokio::test]
async fn cancelled_context_aborts_before_the_first_call() {
    let llm = ScriptedProvider::new();
    let ctx = run_ctx(&llm);
    ctx.abort_all();
    let err = action("a", Vec::new())
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap_err();
    assert!(err.is_abort());
    assert!(llm.requests().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Compression
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn compressing_a_short_transcript_twice_changes_nothing() {
    let llm = ScriptedProvider::with_responses([
        respond(vec![call("e1", "echo", json!({"text": "1"}))]),
        respond(vec![return_output("r1", true, json!("ok"))]),
    ]);
    let ctx = run_ctx(&llm);
    let result = action("short", vec![Arc::new(EchoTool) as Arc<dyn Tool>])
        .execute(&NodeInput::default(), &ctx, None)
        .await
        .unwrap();
    assert!(result.messages.len() <= 10);

    let compressor = SummaryCompress::default();
    let once = compressor.compress(&llm, &result.messages).await.unwrap();
    let twice = compressor.compress(&llm, &once).await.unwrap();
    assert_eq!(once, result.messages);
    assert_eq!(twice, result.messages);
}

#[tokio::test]
async fn failed_compression_falls_back_to_full_history() {
    // Five echo rounds push the history past the threshold; the summary
    // call then fails because the responder refuses tool-less requests.
    let llm = ScriptedProvider::new().with_responder(|messages, params| {
        if params.tools.is_empty() {
            return Err(EkoError::Internal("summary unavailable".into()));
        }
        let round = rounds_done(messages);
        if round < 5 {
            Ok(respond(vec![call(&format!("e{round}"), "echo", json!({"text": "x"}))]))
        } else {
            Ok(respond(vec![return_output("r", true, json!("done"))]))
        }
    });
    let ctx = run_ctx(&llm);
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool)];
    let action = action("long", tools).with_compressor(Arc::new(SummaryCompress::default()));
    let result = action.execute(&NodeInput::default(), &ctx, None).await.unwrap();

    assert_eq!(result.output, json!("done"));
    let last_action_request = llm
        .requests()
        .into_iter()
        .filter(|r| !r.params.tools.is_empty())
        .last()
        .unwrap();
    assert_eq!(last_action_request.messages.len(), 12);
}

#[tokio::test]
async fn summary_is_reused_until_history_outgrows_threshold() {
    // Eight echo rounds, then return_output.  With the default threshold of
    // 10 the history is summarized before rounds 6 and 9 only.
    let action_calls = Arc::new(AtomicUsize::new(0));
    let summary_calls = Arc::new(AtomicUsize::new(0));
    let llm = ScriptedProvider::new().with_responder({
        let action_calls = action_calls.clone();
        let summary_calls = summary_calls.clone();
        move |_messages, params| {
            if params.tools.is_empty() {
                let n = summary_calls.fetch_add(1, Ordering::SeqCst) + 1;
                return Ok(LlmResponse::text(format!("Step 1: summary {n}")));
            }
            let round = action_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if round < 9 {
                Ok(respond(vec![call(&format!("e{round}"), "echo", json!({"text": "x"}))]))
            } else {
                Ok(respond(vec![return_output("r", true, json!("done"))]))
            }
        }
    });
    let ctx = run_ctx(&llm);
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool)];
    let action = action("long", tools).with_compressor(Arc::new(SummaryCompress::default()));
    let result = action.execute(&NodeInput::default(), &ctx, None).await.unwrap();

    assert_eq!(result.output, json!("done"));
    assert_eq!(result.rounds, 9);
    assert_eq!(summary_calls.load(Ordering::SeqCst), 2);
    // The returned transcript is never the compressed one.
    assert_eq!(result.messages.len(), 2 + 9 * 2);

    let action_requests: Vec<_> = llm
        .requests()
        .into_iter()
        .filter(|r| !r.params.tools.is_empty())
        .collect();
    let sizes: Vec<usize> = action_requests.iter().map(|r| r.messages.len()).collect();
    assert_eq!(sizes, vec![2, 4, 6, 8, 10, 5, 7, 9, 5]);
    assert!(action_requests[7].messages[2].text().contains("summary 1"));
    assert!(action_requests[8].messages[2].text().contains("summary 2"));
    for request in &action_requests {
        assert!(validate_tool_pairing(&request.messages).is_ok());
    }

    // The second summary folds in the first.
    let second_summary = llm
        .requests()
        .into_iter()
        .filter(|r| r.params.tools.is_empty())
        .nth(1)
        .unwrap();
    assert!(second_summary.messages[1].text().contains("summary 1"));
}
