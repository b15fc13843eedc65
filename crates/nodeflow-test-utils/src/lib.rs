//! Scripted provider adapters, fixture tools, and sinks for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::Notify;

use nodeflow_core::config::ModelConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{CompletionSink, ProviderAdapter, Tool};
use nodeflow_core::types::*;

/// One scripted provider turn.
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(ProviderResponse),
    Fail(String),
}

/// Adapter that replays a fixed script, one entry per call.
///
/// Calls beyond the script fail with a provider error.
#[derive(Default)]
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Scripted>>,
    transcripts: Mutex<Vec<Vec<ChatMessage>>>,
    tools_seen: Mutex<Vec<Vec<ToolDefinition>>>,
}

impl ScriptedAdapter {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Answers `text` on the first call.
    pub fn answering(text: &str) -> Self {
        Self::new(vec![Scripted::Respond(ProviderResponse::final_answer(text))])
    }

    /// Fails with `message` on the first call.
    pub fn failing(message: &str) -> Self {
        Self::new(vec![Scripted::Fail(message.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.transcripts.lock().unwrap().len()
    }

    pub fn transcript(&self, call: usize) -> Vec<ChatMessage> {
        self.transcripts.lock().unwrap()[call].clone()
    }

    pub fn tools_seen(&self, call: usize) -> Vec<ToolDefinition> {
        self.tools_seen.lock().unwrap()[call].clone()
    }
}

impl ProviderAdapter for ScriptedAdapter {
    fn converse(
        &self,
        _model: &ModelConfig,
        transcript: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ProviderResponse>> {
        self.transcripts.lock().unwrap().push(transcript);
        self.tools_seen.lock().unwrap().push(tools.to_vec());
        let next = self.script.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(Scripted::Respond(r)) => Ok(r),
                Some(Scripted::Fail(msg)) => Err(NodeflowError::ProviderRequest(msg)),
                None => Err(NodeflowError::ProviderRequest("script exhausted".into())),
            }
        })
    }
}

/// Adapter that requests the same tool on every call.
pub struct AlwaysToolAdapter {
    tool: String,
    input: serde_json::Value,
    calls: AtomicUsize,
}

impl AlwaysToolAdapter {
    pub fn new(tool: &str, input: serde_json::Value) -> Self {
        Self {
            tool: tool.to_string(),
            input,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProviderAdapter for AlwaysToolAdapter {
    fn converse(
        &self,
        _model: &ModelConfig,
        _transcript: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ProviderResponse>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let response = ProviderResponse {
            text: format!("calling {} (#{})", self.tool, n),
            ..ProviderResponse::tool_call(format!("call_{}", n), &self.tool, self.input.clone())
        }
        .with_usage(100, 20);
        Box::pin(async move { Ok(response) })
    }
}

/// Adapter whose calls never complete.
#[derive(Default)]
pub struct HangingAdapter {
    calls: AtomicUsize,
}

impl HangingAdapter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProviderAdapter for HangingAdapter {
    fn converse(
        &self,
        _model: &ModelConfig,
        _transcript: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ProviderResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(futures::future::pending())
    }
}

/// Adapter that answers `text` only after [`GatedAdapter::release`] is called.
pub struct GatedAdapter {
    text: String,
    gate: Arc<Notify>,
    calls: AtomicUsize,
}

impl GatedAdapter {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            gate: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn release(&self) {
        self.gate.notify_waiters();
        // Also covers a call that has not reached the await yet
        self.gate.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProviderAdapter for GatedAdapter {
    fn converse(
        &self,
        _model: &ModelConfig,
        _transcript: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ProviderResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.clone();
        let text = self.text.clone();
        Box::pin(async move {
            gate.notified().await;
            Ok(ProviderResponse::final_answer(text))
        })
    }
}

/// Tool that returns its input as JSON text.
pub struct EchoTool {
    name: String,
}

impl EchoTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Echo the input back"
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move { Ok(ToolResult::success(input.to_string())) })
    }
}

/// Tool that fails on every invocation.
pub struct FailingTool {
    name: String,
    calls: Arc<AtomicUsize>,
}

impl FailingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of invocations, readable after the tool is moved into a registry.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    fn execute(&self, _input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tool = self.name.clone();
        Box::pin(async move {
            Err(NodeflowError::ToolExecution {
                tool,
                message: "intentional failure".into(),
            })
        })
    }
}

/// Tool whose invocations never complete.
pub struct HangingTool {
    name: String,
}

impl HangingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Tool for HangingTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Never returns"
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    fn execute(&self, _input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(futures::future::pending())
    }
}

/// Completion sink that keeps every delivered event.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<CompletionEvent>>,
    notify: Notify,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<CompletionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until at least `n` events have been delivered.
    pub async fn wait_for(&self, n: usize) -> Vec<CompletionEvent> {
        loop {
            let notified = self.notify.notified();
            {
                let events = self.events.lock().unwrap();
                if events.len() >= n {
                    return events.clone();
                }
            }
            notified.await;
        }
    }
}

impl CompletionSink for CollectingSink {
    fn deliver(&self, event: CompletionEvent) -> BoxFuture<'_, Result<()>> {
        self.events.lock().unwrap().push(event);
        self.notify.notify_waiters();
        Box::pin(async { Ok(()) })
    }
}
