use std::sync::Arc;
use std::time::Duration;

use nodeflow_agent::run_log::latest_log;
use nodeflow_agent::{
    AgentNode, AgentNodeInput, ExecutionContext, HostSettings, NodeOutcome, RunHost, WaitOutcome,
};
use nodeflow_core::config::AppConfig;
use nodeflow_core::event::EventBus;
use nodeflow_core::types::{FinishReason, ProviderResponse, RunId, ToolReference};
use nodeflow_test_utils::{CollectingSink, EchoTool, Scripted, ScriptedAdapter};
use nodeflow_tools::ToolRegistry;

fn config(log_dir: &std::path::Path) -> AppConfig {
    AppConfig::parse(&format!(
        r#"
[agent]
max_steps = 5

[agent.log]
log_dir = "{}"
level = 3

[model]
provider = "openai"
model_id = "gpt-4o-mini"
"#,
        log_dir.display()
    ))
    .expect("parse config")
}

fn catalog() -> Arc<ToolRegistry> {
    let mut nodes = ToolRegistry::new();
    nodes.register(EchoTool::new("lookup"));
    Arc::new(nodes)
}

fn tool_then_answer() -> Arc<ScriptedAdapter> {
    Arc::new(ScriptedAdapter::new(vec![
        Scripted::Respond(
            ProviderResponse::tool_call("c1", "lookup", serde_json::json!({"q": "oslo"}))
                .with_usage(200, 15),
        ),
        Scripted::Respond(ProviderResponse::final_answer("Oslo is sunny").with_usage(260, 8)),
    ]))
}

async fn read_log_when_complete(dir: &std::path::Path, run_id: &RunId) -> String {
    for _ in 0..200 {
        if let Some(path) = latest_log(dir, run_id) {
            let content = std::fs::read_to_string(path).unwrap_or_default();
            if content.contains("run_complete") {
                return content;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run log never completed");
}

#[tokio::test]
async fn sync_node_runs_tools_and_writes_run_log() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let host = Arc::new(
        RunHost::new(Arc::new(EventBus::default()), catalog())
            .with_settings(HostSettings::from_config(&config.agent, config.credits)),
    );
    let node = AgentNode::from_config("weather-agent", &config, tool_then_answer(), host);

    let input = AgentNodeInput {
        instructions: "Use the lookup tool.".into(),
        input: Some("Weather in Oslo?".into()),
        tools: vec![ToolReference::Node {
            identifier: "lookup".into(),
        }],
        ..Default::default()
    };
    let ctx = ExecutionContext {
        execution_id: Some("exec-42".into()),
        supports_suspension: false,
    };

    let NodeOutcome::Complete(output) = node.execute(input, &ctx).await.unwrap() else {
        panic!("expected sync completion");
    };
    assert_eq!(output.outputs.text, "Oslo is sunny");
    assert_eq!(output.outputs.finish_reason, FinishReason::Completed);
    assert_eq!(output.outputs.total_steps, 2);
    assert_eq!(output.outputs.steps[0].tool_results[0].name, "lookup");
    assert_eq!(output.outputs.usage_metadata.input_tokens, 460);
    assert_eq!(output.outputs.usage_metadata.output_tokens, 23);
    assert!(output.usage >= 1);

    let log = read_log_when_complete(tmp.path(), &RunId::derive("exec-42", "weather-agent")).await;
    let types: Vec<String> = log
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["event_type"].to_string())
        .collect();
    assert!(types.iter().any(|t| t.contains("tool_start")));
    assert!(types.last().unwrap().contains("run_complete"));
}

#[tokio::test]
async fn async_node_delivers_completion_event() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let sink = Arc::new(CollectingSink::default());
    let host = Arc::new(
        RunHost::new(Arc::new(EventBus::default()), catalog())
            .with_settings(HostSettings::from_config(&config.agent, config.credits))
            .with_sink(sink.clone()),
    );
    let node = AgentNode::from_config("weather-agent", &config, tool_then_answer(), host);

    let input = AgentNodeInput {
        input: Some("Weather in Oslo?".into()),
        tools: vec![ToolReference::Node {
            identifier: "lookup".into(),
        }],
        ..Default::default()
    };
    let NodeOutcome::Pending(pending) = node
        .execute(input, &ExecutionContext::suspendable("exec-7"))
        .await
        .unwrap()
    else {
        panic!("expected pending");
    };
    assert_eq!(pending.event().name, "agent-complete:weather-agent");

    let WaitOutcome::Completed(event) = pending.wait().await.unwrap() else {
        panic!("expected completion");
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["event"], "agent-complete:weather-agent");
    assert_eq!(json["outputs"]["text"], "Oslo is sunny");
    assert_eq!(json["outputs"]["finish_reason"], "completed");
    assert!(json["usage"].as_u64().unwrap() >= 1);

    let delivered = sink.wait_for(1).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].run_id, RunId::derive("exec-7", "weather-agent"));
}

#[tokio::test]
async fn unknown_tool_reference_fails_before_running() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let host = Arc::new(RunHost::new(Arc::new(EventBus::default()), catalog()));
    let adapter = tool_then_answer();
    let node = AgentNode::from_config("agent", &config, adapter.clone(), host);

    let input = AgentNodeInput {
        input: Some("go".into()),
        tools: vec![ToolReference::Node {
            identifier: "not-a-node".into(),
        }],
        ..Default::default()
    };
    assert!(node
        .execute(input, &ExecutionContext::suspendable("exec-1"))
        .await
        .is_err());
    assert_eq!(adapter.calls(), 0);
}
