use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key of one logical agent run.
///
/// Derived from the owning workflow execution and the node, so re-invoking
/// the same node inside the same execution addresses the same run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn derive(execution_id: &str, node_id: &str) -> Self {
        Self(format!("{}:{}", execution_id, node_id))
    }

    /// Fresh identity for a run that has no owning execution.
    pub fn ephemeral(node_id: &str) -> Self {
        Self(format!("{}:{}", Uuid::new_v4(), node_id))
    }

}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// A chat message in the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    /// Assistant turn as returned by the provider: optional text plus tool calls.
    pub fn assistant(response: &ProviderResponse) -> Self {
        let mut content = Vec::with_capacity(response.tool_calls.len() + 1);
        if !response.text.is_empty() {
            content.push(ContentBlock::Text {
                text: response.text.clone(),
            });
        }
        for call in &response.tool_calls {
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }
        Self {
            role: Role::Assistant,
            content,
            timestamp: Some(Utc::now()),
        }
    }

    /// Tool results for one step, sent back as a single user message.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: results,
            timestamp: Some(Utc::now()),
        }
    }

    /// Extract all text content from this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract all tool use blocks from this message.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
                _ => None,
            })
            .collect()
    }

    /// Number of characters the provider sees for this message.
    pub fn char_len(&self) -> usize {
        self.content
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => text.chars().count(),
                ContentBlock::ToolUse { name, input, .. } => {
                    name.chars().count() + input.to_string().chars().count()
                }
                ContentBlock::ToolResult { content, .. } => content.chars().count(),
            })
            .sum()
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Token counts reported by a provider for one call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One inference round-trip, as returned by a provider adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    /// `None` when the provider does not report usage.
    pub usage: Option<TokenUsage>,
}

impl ProviderResponse {
    pub fn final_answer(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: vec![],
            usage: None,
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: id.into(),
                name: name.into(),
                input,
            }],
            usage: None,
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(TokenUsage {
            input_tokens,
            output_tokens,
        });
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Characters of model output, used when usage is not reported.
    pub fn output_chars(&self) -> usize {
        self.text.chars().count()
            + self
                .tool_calls
                .iter()
                .map(|c| c.name.chars().count() + c.input.to_string().chars().count())
                .sum::<usize>()
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool definition for sending to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool made available to a run, before resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolReference {
    /// Another workflow node, looked up through the engine's resolver.
    Node { identifier: String },
    /// A self-describing HTTP tool.
    External { spec: ExternalToolSpec },
}

/// Definition of an HTTP-backed tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema")]
    pub input_schema: serde_json::Value,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// One observed tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: String,
    pub is_error: bool,
}

/// One round of the agent loop. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_results: Vec<ToolCallRecord>,
    pub timestamp: DateTime<Utc>,
}

/// Terminal classification of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Completed,
    MaxStepsReached,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::MaxStepsReached => "max_steps_reached",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-million-token prices for one provider/model pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pricing {
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

impl Pricing {
    pub const fn new(input_cost_per_million: f64, output_cost_per_million: f64) -> Self {
        Self {
            input_cost_per_million,
            output_cost_per_million,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageMetadata {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// True when any step's counts came from the character approximation.
    pub estimated: bool,
}

/// Terminal artifact of a run, produced exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub text: String,
    pub steps: Vec<Step>,
    pub total_steps: usize,
    pub finish_reason: FinishReason,
    pub usage_metadata: UsageMetadata,
    pub credits: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    /// All tool invocations of the run, in execution order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.steps.iter().flat_map(|s| s.tool_results.iter())
    }
}

/// Async-mode handle a suspended workflow waits on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingEvent {
    pub name: String,
    pub timeout_secs: u64,
}

impl PendingEvent {
    pub fn for_node(node_id: &str, timeout: Duration) -> Self {
        Self {
            name: format!("agent-complete:{}", node_id),
            // Round up so a sub-second timeout never becomes zero
            timeout_secs: timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Outputs section of a completion event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutputs {
    pub text: String,
    pub steps: Vec<Step>,
    pub total_steps: usize,
    pub finish_reason: FinishReason,
    pub usage_metadata: UsageMetadata,
}

/// What an agent node hands back to the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    pub outputs: NodeOutputs,
    /// Credits charged for the run.
    pub usage: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeOutput {
    pub fn from_result(result: &RunResult) -> Self {
        Self {
            outputs: NodeOutputs {
                text: result.text.clone(),
                steps: result.steps.clone(),
                total_steps: result.total_steps,
                finish_reason: result.finish_reason,
                usage_metadata: result.usage_metadata,
            },
            usage: result.credits,
            error: result.error.clone(),
        }
    }
}

/// Payload delivered once when an async run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub event: String,
    pub run_id: RunId,
    #[serde(flatten)]
    pub output: NodeOutput,
}

impl CompletionEvent {
    pub fn from_result(event: impl Into<String>, result: &RunResult) -> Self {
        Self {
            event: event.into(),
            run_id: result.run_id.clone(),
            output: NodeOutput::from_result(result),
        }
    }
}

/// Agent event broadcast to all subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Run started.
    RunStarted { run_id: RunId, max_steps: usize },
    /// Provider call for a step is about to be issued.
    StepStarted { run_id: RunId, step: usize },
    /// Tool execution started.
    ToolStart {
        run_id: RunId,
        name: String,
        input: serde_json::Value,
    },
    /// Tool execution completed.
    ToolEnd {
        run_id: RunId,
        name: String,
        result: ToolResult,
    },
    /// Step recorded.
    StepComplete {
        run_id: RunId,
        step: usize,
        tool_calls: usize,
    },
    /// Run reached a terminal state.
    RunComplete {
        run_id: RunId,
        finish_reason: FinishReason,
        total_steps: usize,
        input_tokens: u64,
        output_tokens: u64,
        credits: u64,
    },
    /// Run failed.
    RunError { run_id: RunId, error: String },
    /// A waiter gave up on an async run.
    RunTimedOut {
        run_id: RunId,
        pending_event: String,
    },
}

impl AgentEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::ToolStart { run_id, .. }
            | Self::ToolEnd { run_id, .. }
            | Self::StepComplete { run_id, .. }
            | Self::RunComplete { run_id, .. }
            | Self::RunError { run_id, .. }
            | Self::RunTimedOut { run_id, .. } => run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_deterministic() {
        assert_eq!(RunId::derive("exec-1", "agent"), RunId::derive("exec-1", "agent"));
        assert_ne!(RunId::derive("exec-1", "agent"), RunId::derive("exec-2", "agent"));
        assert_ne!(RunId::ephemeral("agent"), RunId::ephemeral("agent"));
    }

    #[test]
    fn run_id_from_str_keeps_text() {
        let id = RunId::from("exec-1:agent");
        assert_eq!(id, RunId::derive("exec-1", "agent"));
        assert_eq!(id.to_string(), "exec-1:agent");
    }

    #[test]
    fn timed_out_event_serializes_with_tag() {
        let ev = AgentEvent::RunTimedOut {
            run_id: RunId::from("e:agent"),
            pending_event: "agent-complete:agent".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "run_timed_out");
        assert_eq!(json["run_id"], "e:agent");
        assert_eq!(json["pending_event"], "agent-complete:agent");
    }

    #[test]
    fn pending_event_rounds_sub_second_timeout_up() {
        let ev = PendingEvent::for_node("agent", Duration::from_millis(500));
        assert_eq!(ev.timeout_secs, 1);
        assert_eq!(ev.timeout(), Duration::from_secs(1));

        let ev = PendingEvent::for_node("agent", Duration::from_secs(1800));
        assert_eq!(ev.timeout_secs, 1800);
        assert_eq!(ev.name, "agent-complete:agent");
    }

    #[test]
    fn finish_reason_serializes_snake_case() {
        let json = serde_json::to_string(&FinishReason::MaxStepsReached).unwrap();
        assert_eq!(json, "\"max_steps_reached\"");
        assert_eq!(FinishReason::Completed.to_string(), "completed");
    }

    #[test]
    fn tool_reference_tagged_by_kind() {
        let node: ToolReference =
            serde_json::from_str(r#"{"kind":"node","identifier":"send-email"}"#).unwrap();
        assert_eq!(
            node,
            ToolReference::Node {
                identifier: "send-email".into()
            }
        );

        let ext: ToolReference = serde_json::from_str(
            r#"{"kind":"external","spec":{"name":"weather","url":"http://localhost/w"}}"#,
        )
        .unwrap();
        match ext {
            ToolReference::External { spec } => {
                assert_eq!(spec.name, "weather");
                assert!(spec.headers.is_empty());
                assert_eq!(spec.input_schema["type"], "object");
            }
            _ => panic!("expected External"),
        }
    }

    #[test]
    fn pending_event_named_after_node() {
        let ev = PendingEvent::for_node("agent-7", Duration::from_secs(1800));
        assert_eq!(ev.name, "agent-complete:agent-7");
        assert_eq!(ev.timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn assistant_message_carries_tool_uses() {
        let resp = ProviderResponse::tool_call("c1", "calculator", serde_json::json!({"a": 1}));
        let msg = ChatMessage::assistant(&resp);
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.text().is_empty());
        let uses = msg.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].1, "calculator");
    }

    #[test]
    fn completion_event_shape() {
        let result = RunResult {
            run_id: RunId::derive("e", "n"),
            text: "4".into(),
            steps: vec![],
            total_steps: 1,
            finish_reason: FinishReason::Completed,
            usage_metadata: UsageMetadata::default(),
            credits: 1,
            error: None,
        };
        let ev = CompletionEvent::from_result("agent-complete:n", &result);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["outputs"]["text"], "4");
        assert_eq!(json["outputs"]["finish_reason"], "completed");
        assert_eq!(json["usage"], 1);
        assert!(json.get("error").is_none());
    }
}
