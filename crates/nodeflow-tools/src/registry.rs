use std::collections::BTreeMap;
use std::sync::Arc;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{Tool, ToolResolver};
use nodeflow_core::types::{ToolDefinition, ToolResult};

/// Registry of tools available to a run.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an already shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all registered tools.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool definitions for sending to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, input: serde_json::Value) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| NodeflowError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(input)).await {
            Ok(result) => result,
            Err(_) => Err(NodeflowError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A registry doubles as a resolver for node tools registered by name.
impl ToolResolver for ToolRegistry {
    fn resolve_node(&self, identifier: &str) -> Option<Arc<dyn Tool>> {
        self.get(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;

    struct Upper;

    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase text"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async move {
                let text = input
                    .get("text")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| NodeflowError::ToolValidation("missing text".into()))?;
                Ok(ToolResult::success(text.to_uppercase()))
            })
        }
    }

    struct Sleepy;

    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn execute(&self, _input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(ToolResult::success("late"))
            })
        }
        fn timeout_secs(&self) -> u64 {
            5
        }
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);
        let result = registry
            .execute("upper", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result, ToolResult::success("HI"));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.execute("nope", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, NodeflowError::ToolNotFound(n) if n == "nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(Sleepy);
        let err = registry.execute("sleepy", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, NodeflowError::ToolTimeout { timeout_secs: 5, .. }));
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);
        registry.register(Sleepy);
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["sleepy", "upper"]);
        assert!(registry.resolve_node("upper").is_some());
        assert!(registry.resolve_node("missing").is_none());
    }
}
