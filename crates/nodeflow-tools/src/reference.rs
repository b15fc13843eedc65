use tracing::debug;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::ToolResolver;
use nodeflow_core::types::ToolReference;

use crate::external::ExternalTool;
use crate::registry::ToolRegistry;

/// Resolve a run's tool references into a registry, once, before the loop starts.
///
/// Node references go through `resolver`; external references become HTTP
/// tools with `external_timeout_secs`. Unknown nodes and duplicate tool names
/// are rejected.
pub fn resolve_tools(
    references: &[ToolReference],
    resolver: &dyn ToolResolver,
    external_timeout_secs: u64,
) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    for reference in references {
        let tool = match reference {
            ToolReference::Node { identifier } => resolver
                .resolve_node(identifier)
                .ok_or_else(|| NodeflowError::ToolNotFound(identifier.clone()))?,
            ToolReference::External { spec } => {
                std::sync::Arc::new(ExternalTool::new(spec.clone(), external_timeout_secs)?)
            }
        };

        if registry.contains(tool.name()) {
            return Err(NodeflowError::ToolValidation(format!(
                "duplicate tool name: {}",
                tool.name()
            )));
        }
        debug!(tool = %tool.name(), "Resolved tool reference");
        registry.register_arc(tool);
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use nodeflow_core::traits::Tool;
    use nodeflow_core::types::{ExternalToolSpec, ToolResult};
    use std::collections::HashMap;

    struct Named(&'static str);

    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "node tool"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn execute(&self, _input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async { Ok(ToolResult::success("ok")) })
        }
    }

    fn catalog() -> ToolRegistry {
        let mut nodes = ToolRegistry::new();
        nodes.register(Named("send_email"));
        nodes.register(Named("weather"));
        nodes
    }

    fn external(name: &str) -> ToolReference {
        ToolReference::External {
            spec: ExternalToolSpec {
                name: name.into(),
                description: String::new(),
                input_schema: serde_json::json!({"type": "object"}),
                url: "https://tools.example.invalid/run".into(),
                headers: HashMap::new(),
            },
        }
    }

    #[test]
    fn resolves_node_and_external_references() {
        let refs = vec![
            ToolReference::Node {
                identifier: "send_email".into(),
            },
            external("lookup"),
        ];
        let registry = resolve_tools(&refs, &catalog(), 30).unwrap();
        assert_eq!(registry.list(), vec!["lookup", "send_email"]);
    }

    #[test]
    fn unknown_node_is_rejected() {
        let refs = vec![ToolReference::Node {
            identifier: "missing".into(),
        }];
        let err = resolve_tools(&refs, &catalog(), 30).err().unwrap();
        assert!(matches!(err, NodeflowError::ToolNotFound(id) if id == "missing"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let refs = vec![
            ToolReference::Node {
                identifier: "weather".into(),
            },
            external("weather"),
        ];
        let err = resolve_tools(&refs, &catalog(), 30).err().unwrap();
        assert!(matches!(err, NodeflowError::ToolValidation(_)));
    }

    #[test]
    fn empty_reference_list_gives_empty_registry() {
        let registry = resolve_tools(&[], &catalog(), 30).unwrap();
        assert!(registry.is_empty());
    }
}
