use futures::future::BoxFuture;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::Tool;
use nodeflow_core::types::{ExternalToolSpec, ToolResult};

/// Longest response body handed back to the model.
const MAX_BODY_CHARS: usize = 10_000;

// ── ExternalTool ────────────────────────────────────────────────

/// HTTP-backed tool described by an [`ExternalToolSpec`].
///
/// Arguments are POSTed as a JSON body; the response body is the result.
pub struct ExternalTool {
    spec: ExternalToolSpec,
    timeout_secs: u64,
    http: reqwest::Client,
}

impl ExternalTool {
    pub fn new(spec: ExternalToolSpec, timeout_secs: u64) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(NodeflowError::ToolValidation(
                "external tool needs a name".into(),
            ));
        }
        if !(spec.url.starts_with("http://") || spec.url.starts_with("https://")) {
            return Err(NodeflowError::ToolValidation(format!(
                "external tool '{}' has an invalid url: {}",
                spec.name, spec.url
            )));
        }
        Ok(Self {
            spec,
            timeout_secs,
            http: reqwest::Client::new(),
        })
    }

    fn failure(&self, message: impl Into<String>) -> NodeflowError {
        NodeflowError::ToolExecution {
            tool: self.spec.name.clone(),
            message: message.into(),
        }
    }
}

impl Tool for ExternalTool {
    fn name(&self) -> &str {
        &self.spec.name
    }
    fn description(&self) -> &str {
        &self.spec.description
    }
    fn input_schema(&self) -> serde_json::Value {
        self.spec.input_schema.clone()
    }
    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let mut req = self.http.post(&self.spec.url).json(&input);
            for (k, v) in &self.spec.headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let resp = req.send().await.map_err(|e| self.failure(e.to_string()))?;
            let status = resp.status();
            let body = resp.text().await.map_err(|e| self.failure(e.to_string()))?;
            let truncated: String = body.chars().take(MAX_BODY_CHARS).collect();

            if status.is_success() {
                Ok(ToolResult::success(truncated))
            } else {
                Err(self.failure(format!("HTTP {}: {}", status, truncated)))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spec(url: &str) -> ExternalToolSpec {
        ExternalToolSpec {
            name: "weather".into(),
            description: "Current weather".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {"city": {"type": "string"}}}),
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    #[test]
    fn exposes_spec_as_definition() {
        let tool = ExternalTool::new(spec("https://example.invalid/weather"), 30).unwrap();
        assert_eq!(tool.name(), "weather");
        assert_eq!(tool.description(), "Current weather");
        assert_eq!(tool.timeout_secs(), 30);
        assert_eq!(tool.input_schema()["properties"]["city"]["type"], "string");
    }

    #[test]
    fn rejects_non_http_url() {
        let err = ExternalTool::new(spec("ftp://example.invalid"), 30).err().unwrap();
        assert!(matches!(err, NodeflowError::ToolValidation(_)));
    }

    #[test]
    fn rejects_blank_name() {
        let mut s = spec("http://localhost");
        s.name = "  ".into();
        assert!(ExternalTool::new(s, 30).is_err());
    }

    #[tokio::test]
    async fn connection_failure_is_tool_error() {
        // Port 9 (discard) is not listening on loopback in test environments
        let tool = ExternalTool::new(spec("http://127.0.0.1:9/weather"), 5).unwrap();
        let err = tool.execute(serde_json::json!({"city": "Oslo"})).await.unwrap_err();
        assert!(matches!(err, NodeflowError::ToolExecution { ref tool, .. } if tool == "weather"));
    }
}
