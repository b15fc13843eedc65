use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Provider adapter: one inference call against an LLM vendor.
pub trait ProviderAdapter: Send + Sync + 'static {
    /// Send the transcript and tool definitions, receive either a final
    /// answer or one or more tool-call requests.
    fn converse(
        &self,
        model: &ModelConfig,
        transcript: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ProviderResponse>>;
}

/// Tool: a callable made available to the model.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Resolves `ToolReference::Node` identifiers into callables.
///
/// Implemented by the workflow engine, which owns the node catalog.
pub trait ToolResolver: Send + Sync {
    fn resolve_node(&self, identifier: &str) -> Option<Arc<dyn Tool>>;
}

/// Delivers completion events to the substrate that resumes workflows.
pub trait CompletionSink: Send + Sync + 'static {
    fn deliver(&self, event: CompletionEvent) -> BoxFuture<'_, Result<()>>;
}
