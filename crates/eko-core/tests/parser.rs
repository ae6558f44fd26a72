//! Integration tests for workflow documents and the facade.

mod common;

use std::sync::Arc;

use serde_json::{Value, json};

use eko_core::{
    Eko, EkoConfig, EkoError, LlmProvider, LlmResponse, ProviderSpec, ScriptedProvider, Tool,
    ToolRegistry, WorkflowParser,
};

use common::*;

const DOCUMENT: &str = r#"{
    "id": "wf-weather",
    "name": "Weather report",
    "description": "Look up the weather and write a report",
    "nodes": [
        {
            "id": "lookup",
            "name": "Look up",
            "action": {"type": "prompt", "name": "lookup", "description": "Find the forecast", "tools": ["echo", "write_context"]}
        },
        {
            "id": "report",
            "dependencies": ["lookup"],
            "action": {"type": "hybrid", "name": "report", "description": "Write it up", "tools": []},
            "output": {"type": "string"}
        }
    ],
    "variables": {"city": "Paris"}
}"#;

fn registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool)).unwrap();
    registry
}

fn provider() -> Arc<dyn LlmProvider> {
    Arc::new(ScriptedProvider::new())
}

#[test]
fn serialize_round_trip_preserves_structure() {
    let doc = WorkflowParser::parse(DOCUMENT).unwrap();
    let wf = WorkflowParser::build(&doc, &registry(), provider(), &EkoConfig::default()).unwrap();

    let json = WorkflowParser::serialize(&wf).unwrap();
    let again = WorkflowParser::parse(&json).unwrap();

    let ids: Vec<_> = again.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["lookup", "report"]);
    assert_eq!(again.nodes[1].dependencies, vec!["lookup".to_string()]);
    // write_context is injected into every action and is not serialized.
    assert_eq!(again.nodes[0].action.tools, vec!["echo".to_string()]);
    assert!(again.nodes[1].action.tools.is_empty());
    assert_eq!(again.nodes[1].output, Some(json!({"type": "string"})));
    assert_eq!(again.variables.get("city"), Some(&json!("Paris")));
    assert_eq!(again.description, "Look up the weather and write a report");

    // A second pass is stable.
    let rebuilt =
        WorkflowParser::build(&again, &registry(), provider(), &EkoConfig::default()).unwrap();
    assert_eq!(WorkflowParser::serialize(&rebuilt).unwrap(), json);
}

#[test]
fn built_workflow_carries_configuration() {
    let doc = WorkflowParser::parse(DOCUMENT).unwrap();
    let config = EkoConfig::from_toml_str("[action]\nmax_rounds = 7\n").unwrap();
    let wf = WorkflowParser::build(&doc, &registry(), provider(), &config).unwrap();

    let lookup = wf.get_node("lookup").unwrap();
    assert_eq!(lookup.name, "Look up");
    assert_eq!(lookup.action.config().max_rounds, 7);
    assert_eq!(lookup.action.tool_names(), vec!["echo".to_string()]);
    // Missing names default to the id.
    assert_eq!(wf.get_node("report").unwrap().name, "report");
    assert_eq!(wf.variables().get("city"), Some(json!("Paris")));
}

#[test]
fn self_and_mutual_cycles_are_invalid() {
    let mut value: Value = serde_json::from_str(DOCUMENT).unwrap();
    value["nodes"][0]["dependencies"] = json!(["report"]);
    let result = WorkflowParser::validate(&value);
    assert!(!result.valid);
    assert!(result.errors.iter().any(|e| e.contains("circular dependency")));

    let mut value: Value = serde_json::from_str(DOCUMENT).unwrap();
    value["nodes"][1]["dependencies"] = json!(["report"]);
    assert!(!WorkflowParser::validate(&value).valid);
    let err = WorkflowParser::from_value(value).unwrap_err();
    assert!(matches!(err, EkoError::InvalidWorkflow { .. }));
}

#[test]
fn workflow_schema_lists_registered_tools() {
    let schema = registry().get_workflow_schema();
    let tools = &schema["properties"]["nodes"]["items"]["properties"]["action"]["properties"]["tools"];
    assert_eq!(tools["items"]["enum"], json!(["echo"]));
}

// ═══════════════════════════════════════════════════════════════════════
//  Facade
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn eko_runs_a_generated_workflow() {
    let generated = json!({
        "id": "ignored",
        "name": "Echo twice",
        "nodes": [
            {"id": "first", "action": {"type": "prompt", "name": "first", "description": "Echo", "tools": ["echo"]}},
            {"id": "second", "dependencies": ["first"], "action": {"type": "prompt", "name": "second", "description": "Echo again", "tools": ["echo"]}}
        ]
    });
    let llm = ScriptedProvider::with_responses([respond(vec![eko_core::ToolCall {
        id: "g".into(),
        name: "generate_workflow".into(),
        arguments: generated,
    }])])
    .with_responder(|messages, params| {
        if is_summary_request(params) {
            return Ok(LlmResponse::text("Echoed twice."));
        }
        let step = step_of(messages);
        Ok(respond(vec![return_output(&step, true, json!(step))]))
    });

    let provider: Arc<dyn LlmProvider> = Arc::new(llm.clone());
    let eko = Eko::new(ProviderSpec::Client(provider), EkoConfig::default()).unwrap();
    eko.register_tool(Arc::new(EchoTool) as Arc<dyn Tool>).unwrap();

    let result = eko.run("echo something twice").await.unwrap();
    assert!(result.is_successful);
    assert_eq!(result.summary, "Echoed twice.");
    // generate + two nodes + summary
    assert_eq!(llm.requests().len(), 4);
}

#[tokio::test]
async fn eko_loads_and_executes_a_document() {
    let llm = ScriptedProvider::new().with_responder(|messages, params| {
        if is_summary_request(params) {
            return Ok(LlmResponse::text("ok"));
        }
        Ok(respond(vec![return_output("r", true, json!(step_of(messages)))]))
    });
    let provider: Arc<dyn LlmProvider> = Arc::new(llm);
    let eko = Eko::new(ProviderSpec::Client(provider), EkoConfig::default()).unwrap();
    eko.register_tool(Arc::new(EchoTool)).unwrap();

    let wf = eko.load(DOCUMENT).unwrap();
    let result = eko.execute(&wf).await.unwrap();
    assert!(result.is_successful);
    assert_eq!(wf.get_node("report").unwrap().output(), Some(&json!("report")));
}
