use async_trait::async_trait;
use pagelens_core::{ChatMessage, Error, LLMResponse, Result, ToolCallRequest};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::Provider;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, api_base: Option<&str>, model: &str, max_tokens: u32) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key: api_key.to_string(),
            api_base: api_base
                .unwrap_or(ANTHROPIC_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            max_tokens,
        }
    }

    /// Convert OpenAI-style tool schemas to Anthropic tool format.
    /// OpenAI: { type: "function", function: { name, description, parameters } }
    /// Anthropic: { name, description, input_schema }
    fn convert_tools(tools: &[Value]) -> Vec<Value> {
        tools
            .iter()
            .filter_map(|tool| {
                let func = tool.get("function")?;
                let name = func.get("name")?.as_str()?;
                let description = func.get("description").and_then(|v| v.as_str()).unwrap_or("");
                let parameters = func.get("parameters").cloned().unwrap_or(json!({
                    "type": "object",
                    "properties": {}
                }));
                Some(json!({
                    "name": name,
                    "description": description,
                    "input_schema": parameters,
                }))
            })
            .collect()
    }

    /// Anthropic takes the system prompt as a top-level parameter, only
    /// user/assistant turns in `messages`, and tool results as user
    /// messages with tool_result content blocks.
    fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
        let mut system_text: Option<String> = None;
        let mut converted: Vec<Value> = Vec::new();

        for msg in messages {
            match msg.role.as_str() {
                "system" => {
                    system_text = Some(match system_text {
                        Some(existing) => format!("{}\n\n{}", existing, msg.content),
                        None => msg.content.clone(),
                    });
                }
                "user" => {
                    converted.push(json!({"role": "user", "content": msg.content}));
                }
                "assistant" => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": msg.content}));
                    }
                    if let Some(tool_calls) = &msg.tool_calls {
                        for call in tool_calls {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.name,
                                "input": call.arguments,
                            }));
                        }
                    }
                    if blocks.is_empty() {
                        blocks.push(json!({"type": "text", "text": ""}));
                    }
                    converted.push(json!({"role": "assistant", "content": blocks}));
                }
                "tool" => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.as_deref().unwrap_or(""),
                        "content": msg.content,
                    });
                    converted.push(json!({"role": "user", "content": [block]}));
                }
                _ => {
                    converted.push(json!({"role": "user", "content": msg.content}));
                }
            }
        }

        (system_text, Self::merge_consecutive_roles(converted))
    }

    /// Anthropic requires alternating user/assistant turns.
    fn merge_consecutive_roles(messages: Vec<Value>) -> Vec<Value> {
        let mut result: Vec<Value> = Vec::new();
        for msg in messages {
            let role = msg.get("role").and_then(|v| v.as_str()).unwrap_or("");
            let last_role = result
                .last()
                .and_then(|v| v.get("role"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if role == last_role && !result.is_empty() {
                if let Some(last) = result.last_mut() {
                    let last_content = last.get("content").cloned().unwrap_or(Value::Null);
                    let new_content = msg.get("content").cloned().unwrap_or(Value::Null);
                    let merged = match (last_content, new_content) {
                        (Value::Array(mut a), Value::Array(b)) => {
                            a.extend(b);
                            Value::Array(a)
                        }
                        (Value::Array(mut a), Value::String(s)) => {
                            a.push(json!({"type": "text", "text": s}));
                            Value::Array(a)
                        }
                        (Value::String(s), Value::Array(mut a)) => {
                            let mut blocks = vec![json!({"type": "text", "text": s})];
                            blocks.append(&mut a);
                            Value::Array(blocks)
                        }
                        (Value::String(s1), Value::String(s2)) => {
                            Value::String(format!("{}\n\n{}", s1, s2))
                        }
                        (existing, _) => existing,
                    };
                    last["content"] = merged;
                }
            } else {
                result.push(msg);
            }
        }
        result
    }

    /// Config may store "anthropic/claude-..." but the API wants "claude-...".
    fn normalize_model(model: &str) -> &str {
        model.strip_prefix("anthropic/").unwrap_or(model)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse> {
        let url = format!("{}/messages", self.api_base);
        let model = Self::normalize_model(&self.model);

        let (system, converted) = Self::convert_messages(messages);
        let converted_tools = Self::convert_tools(tools);

        let mut request = json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "messages": converted,
        });
        if let Some(system) = &system {
            request["system"] = Value::String(system.clone());
        }
        if !converted_tools.is_empty() {
            request["tools"] = Value::Array(converted_tools);
        }

        info!(
            url = %url,
            model = %model,
            tools_count = tools.len(),
            messages_count = messages.len(),
            "Calling Anthropic API"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Anthropic request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %raw_body, "Anthropic API error");
            return Err(Error::Provider(format!(
                "Anthropic API error {}: {}",
                status, raw_body
            )));
        }

        debug!(body_len = raw_body.len(), "Anthropic raw response");

        let resp: AnthropicResponse = serde_json::from_str(&raw_body).map_err(|e| {
            Error::Provider(format!(
                "Failed to parse Anthropic response: {}. Body: {}",
                e,
                &raw_body[..raw_body.len().min(500)]
            ))
        })?;

        let mut text_parts: Vec<String> = Vec::new();
        let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
        for block in &resp.content {
            match block.block_type.as_str() {
                "text" => {
                    if let Some(text) = &block.text {
                        if !text.is_empty() {
                            text_parts.push(text.clone());
                        }
                    }
                }
                "tool_use" => {
                    if let (Some(id), Some(name)) = (&block.id, &block.name) {
                        tool_calls.push(ToolCallRequest {
                            id: id.clone(),
                            name: name.clone(),
                            arguments: block
                                .input
                                .clone()
                                .unwrap_or(Value::Object(serde_json::Map::new())),
                        });
                    }
                }
                _ => {}
            }
        }

        let finish_reason = match resp.stop_reason.as_deref() {
            Some("end_turn") => "stop".to_string(),
            Some("tool_use") => "tool_calls".to_string(),
            Some("max_tokens") => "length".to_string(),
            Some(other) => other.to_string(),
            None => "stop".to_string(),
        };

        let usage = json!({
            "prompt_tokens": resp.usage.as_ref().and_then(|u| u.input_tokens),
            "completion_tokens": resp.usage.as_ref().and_then(|u| u.output_tokens),
        });

        Ok(LLMResponse {
            content: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join("\n"))
            },
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_schema_conversion() {
        let tools = vec![json!({
            "type": "function",
            "function": {
                "name": "click",
                "description": "Click an element",
                "parameters": {"type": "object", "properties": {"ref": {"type": "string"}}}
            }
        })];
        let converted = AnthropicProvider::convert_tools(&tools);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0]["name"], "click");
        assert_eq!(converted[0]["input_schema"]["properties"]["ref"]["type"], "string");
    }

    #[test]
    fn tool_results_become_user_tool_result_blocks() {
        let messages = vec![
            ChatMessage::system("protocol"),
            ChatMessage::user("URL: http://a"),
            ChatMessage::assistant_tool_call(ToolCallRequest {
                id: "call_1".to_string(),
                name: "click".to_string(),
                arguments: json!({"ref": "e3"}),
            }),
            ChatMessage::tool_result("call_1", "Action: Clicked at (10, 20)"),
        ];
        let (system, converted) = AnthropicProvider::convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("protocol"));
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[1]["content"][0]["type"], "tool_use");
        assert_eq!(converted[2]["role"], "user");
        assert_eq!(converted[2]["content"][0]["type"], "tool_result");
        assert_eq!(converted[2]["content"][0]["tool_use_id"], "call_1");
    }

    #[test]
    fn consecutive_tool_results_merge_into_one_user_turn() {
        let messages = vec![
            ChatMessage::tool_result("call_1", "one"),
            ChatMessage::tool_result("call_2", "two"),
        ];
        let (_, converted) = AnthropicProvider::convert_messages(&messages);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0]["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn model_prefix_is_stripped() {
        assert_eq!(
            AnthropicProvider::normalize_model("anthropic/claude-sonnet-4-20250514"),
            "claude-sonnet-4-20250514"
        );
    }

    #[test]
    fn response_blocks_parse_into_calls_and_text() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "Clicking now."},
                {"type": "tool_use", "id": "toolu_1", "name": "click", "input": {"ref": "e5"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 200, "output_tokens": 30}
        }"#;
        let parsed: AnthropicResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert_eq!(parsed.content[1].name.as_deref(), Some("click"));
        assert_eq!(parsed.stop_reason.as_deref(), Some("tool_use"));
    }
}
