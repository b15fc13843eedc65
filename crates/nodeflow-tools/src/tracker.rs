use tracing::debug;

use nodeflow_core::error::Result;
use nodeflow_core::types::{ToolCallRecord, ToolDefinition, ToolResult};

use crate::registry::ToolRegistry;

/// Observes every tool invocation of a run.
///
/// Exposes the same definitions and execution contract as the wrapped
/// registry. Results and errors are returned unchanged; the tracker only
/// appends a [`ToolCallRecord`] per call, including calls that fail to
/// resolve or time out.
pub struct ToolCallTracker {
    tools: ToolRegistry,
    records: Vec<ToolCallRecord>,
}

impl ToolCallTracker {
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            tools,
            records: Vec::new(),
        }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }

    /// Execute a tool and record the call.
    pub async fn execute(&mut self, name: &str, input: serde_json::Value) -> Result<ToolResult> {
        let result = self.tools.execute(name, input.clone()).await;

        let (content, is_error) = match &result {
            Ok(r) => (r.content.clone(), r.is_error),
            Err(e) => (e.to_string(), true),
        };
        debug!(tool = %name, is_error, "Tool call recorded");
        self.records.push(ToolCallRecord {
            name: name.to_string(),
            arguments: input,
            result: content,
            is_error,
        });

        result
    }

    /// All records, in call order.
    pub fn records(&self) -> &[ToolCallRecord] {
        &self.records
    }

    /// Records appended after the first `start` calls.
    pub fn records_since(&self, start: usize) -> Vec<ToolCallRecord> {
        self.records.get(start..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<ToolCallRecord> {
        self.records
    }
}
