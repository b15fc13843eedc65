use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use nodeflow_core::config::ModelConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::ProviderAdapter;
use nodeflow_core::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible adapter. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiAdapter {
    http: Client,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize, Debug)]
pub(crate) struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
    function: OaiFunction,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Deserialize, Debug)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ResponseUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    let mut oai_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                oai_msgs.push(OaiMessage {
                    role: "system".to_string(),
                    content: Some(serde_json::Value::String(msg.text())),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
            Role::User => {
                // Tool results travel as user messages internally
                let tool_results: Vec<_> = msg
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => Some((tool_use_id.clone(), content.clone())),
                        _ => None,
                    })
                    .collect();

                if !tool_results.is_empty() {
                    for (id, content) in tool_results {
                        oai_msgs.push(OaiMessage {
                            role: "tool".to_string(),
                            content: Some(serde_json::Value::String(content)),
                            tool_calls: None,
                            tool_call_id: Some(id),
                        });
                    }
                } else {
                    oai_msgs.push(OaiMessage {
                        role: "user".to_string(),
                        content: Some(serde_json::Value::String(msg.text())),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }
            }
            Role::Assistant => {
                let tool_uses = msg.tool_uses();
                let text = msg.text();
                if tool_uses.is_empty() {
                    oai_msgs.push(OaiMessage {
                        role: "assistant".to_string(),
                        content: Some(serde_json::Value::String(text)),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                } else {
                    let calls: Vec<OaiToolCall> = tool_uses
                        .iter()
                        .map(|(id, name, input)| OaiToolCall {
                            id: Some(id.to_string()),
                            r#type: Some("function".to_string()),
                            function: OaiFunction {
                                name: name.to_string(),
                                arguments: input.to_string(),
                            },
                        })
                        .collect();

                    oai_msgs.push(OaiMessage {
                        role: "assistant".to_string(),
                        content: if text.is_empty() {
                            None
                        } else {
                            Some(serde_json::Value::String(text))
                        },
                        tool_calls: Some(calls),
                        tool_call_id: None,
                    });
                }
            }
        }
    }

    oai_msgs
}

pub(crate) fn parse_response(body: ChatResponse) -> Result<ProviderResponse> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| NodeflowError::ProviderParse("response has no choices".into()))?;

    if choice.finish_reason.as_deref() == Some("length") {
        warn!("Provider hit max tokens");
    }

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, tc)| {
            let input = if tc.function.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
                    warn!(tool = %tc.function.name, error = %e, "Tool arguments are not valid JSON");
                    serde_json::Value::Null
                })
            };
            ToolCallRequest {
                id: tc.id.unwrap_or_else(|| format!("call_{}", i)),
                name: tc.function.name,
                input,
            }
        })
        .collect();

    Ok(ProviderResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage: body.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
    })
}

impl ProviderAdapter for OpenAiAdapter {
    fn converse(
        &self,
        model: &ModelConfig,
        transcript: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ProviderResponse>> {
        let model = model.clone();
        let oai_tools = convert_tools(tools);

        Box::pin(async move {
            let base_url = model.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let body = ChatRequest {
                model: model.model_id.clone(),
                messages: convert_messages(transcript),
                max_tokens: model.max_tokens,
                temperature: if model.temperature > 0.0 {
                    Some(model.temperature)
                } else {
                    None
                },
                tools: oai_tools,
            };

            let mut req = self.http.post(base_url).json(&body);

            if let Some(api_key) = &model.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req
                .send()
                .await
                .map_err(|e| NodeflowError::ProviderRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(NodeflowError::ProviderRequest(format!("HTTP {}: {}", status, body)));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| NodeflowError::ProviderParse(e.to_string()))?;

            let out = parse_response(parsed)?;
            debug!(
                model = %model.model_id,
                tool_calls = out.tool_calls.len(),
                reported_usage = out.usage.is_some(),
                "Provider call complete"
            );
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<ProviderResponse> {
        parse_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn parses_final_answer_with_usage() {
        let resp = parse(
            r#"{"choices":[{"message":{"role":"assistant","content":"4"},"finish_reason":"stop"}],
                "usage":{"prompt_tokens":12,"completion_tokens":1}}"#,
        )
        .unwrap();
        assert_eq!(resp.text, "4");
        assert!(!resp.has_tool_calls());
        assert_eq!(
            resp.usage,
            Some(TokenUsage {
                input_tokens: 12,
                output_tokens: 1
            })
        );
    }

    #[test]
    fn parses_tool_calls() {
        let resp = parse(
            r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[
                {"id":"call_a","type":"function","function":{"name":"calculator","arguments":"{\"expr\":\"2+2\"}"}}
            ]},"finish_reason":"tool_calls"}]}"#,
        )
        .unwrap();
        assert!(resp.text.is_empty());
        assert!(resp.usage.is_none());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "call_a");
        assert_eq!(resp.tool_calls[0].name, "calculator");
        assert_eq!(resp.tool_calls[0].input["expr"], "2+2");
    }

    #[test]
    fn empty_choices_is_parse_error() {
        let err = parse(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, NodeflowError::ProviderParse(_)));
    }

    #[test]
    fn tool_results_become_tool_messages() {
        let resp = ProviderResponse::tool_call("c1", "calculator", serde_json::json!({}));
        let msgs = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("2+2?"),
            ChatMessage::assistant(&resp),
            ChatMessage::tool_results(vec![ContentBlock::ToolResult {
                tool_use_id: "c1".into(),
                content: "4".into(),
                is_error: false,
            }]),
        ];
        let oai = convert_messages(msgs);
        let roles: Vec<_> = oai.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert!(oai[2].content.is_none());
        assert_eq!(oai[2].tool_calls.as_ref().unwrap()[0].function.name, "calculator");
        assert_eq!(oai[3].tool_call_id.as_deref(), Some("c1"));
    }
}
