//! Anthropic Claude adapter.
//!
//! Implements [`ChatProvider`] for Claude models via the Anthropic
//! Messages API (https://api.anthropic.com/v1/messages). The canonical
//! `function` role has no direct Claude equivalent: results travel as
//! `tool_result` blocks on `user` messages, and the renaming is reversed
//! when parsing `tool_use` blocks out of responses.

use async_trait::async_trait;
use tracing::debug;

use datachat_common::{EngineError, ProviderError};

use crate::{ChatMessage, ChatProvider, FunctionCall, ProviderReply, Role, TokenUsage, ToolDefinition};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude adapter configuration.
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Bounds the blocking interval of a single loop iteration.
    pub timeout: std::time::Duration,
}

impl ClaudeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            timeout: std::time::Duration::from_secs(60),
        }
    }

    /// Create config from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env() -> datachat_common::Result<Self> {
        let key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| EngineError::Configuration("ANTHROPIC_API_KEY not set".into()))?;
        Ok(Self::new(key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Claude API adapter.
pub struct ClaudeProvider {
    config: ClaudeConfig,
    http: reqwest::Client,
}

impl ClaudeProvider {
    pub fn new(config: ClaudeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Build the JSON request body for the Messages API.
    fn build_request_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> serde_json::Value {
        let mut msgs = Vec::new();
        // Claude addresses tool results by the id of the tool_use block
        // that requested them; carry it from the preceding assistant turn.
        let mut pending_call_id = String::new();

        for msg in messages {
            match msg.role {
                Role::System => continue, // lifted into the top-level system field
                Role::User => {
                    msgs.push(serde_json::json!({
                        "role": "user",
                        "content": msg.content.clone().unwrap_or_default(),
                    }));
                }
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if let Some(text) = msg.content.as_deref().filter(|t| !t.is_empty()) {
                        blocks.push(serde_json::json!({"type": "text", "text": text}));
                    }
                    if let Some(call) = &msg.function_call {
                        pending_call_id = call.id.clone();
                        blocks.push(serde_json::json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    msgs.push(serde_json::json!({"role": "assistant", "content": blocks}));
                }
                Role::Function => {
                    let text = msg.content.clone().unwrap_or_default();
                    // A result with no preceding tool_use (e.g. the call was
                    // trimmed out of history) cannot reference a valid id;
                    // Claude rejects such blocks, so send it as plain text.
                    if pending_call_id.is_empty() {
                        msgs.push(serde_json::json!({
                            "role": "user",
                            "content": format!(
                                "[Tool result: {}]\n{text}",
                                msg.name.as_deref().unwrap_or_default(),
                            ),
                        }));
                    } else {
                        msgs.push(serde_json::json!({
                            "role": "user",
                            "content": [{
                                "type": "tool_result",
                                "tool_use_id": std::mem::take(&mut pending_call_id),
                                "content": text,
                            }],
                        }));
                    }
                }
            }
        }

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": msgs,
        });

        for msg in messages {
            if msg.role == Role::System {
                body["system"] = serde_json::json!(msg.content.clone().unwrap_or_default());
                break;
            }
        }

        if !tools.is_empty() {
            let tool_defs: Vec<_> = tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.json_schema(),
                    })
                })
                .collect();
            body["tools"] = serde_json::json!(tool_defs);
        }

        body
    }

    /// Parse a Messages API response into the canonical reply shape.
    fn parse_reply(&self, json: serde_json::Value) -> Result<ProviderReply, ProviderError> {
        let blocks = json["content"]
            .as_array()
            .ok_or_else(|| ProviderError::Parse("no content blocks in response".to_string()))?;

        let mut content = String::new();
        let mut function_call = None;

        for block in blocks {
            if block["type"] == "text" {
                if let Some(text) = block["text"].as_str() {
                    content.push_str(text);
                }
            } else if block["type"] == "tool_use" && function_call.is_none() {
                function_call = Some(FunctionCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    arguments: block["input"].clone(),
                });
            }
        }

        let usage = TokenUsage {
            input_tokens: json["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: json["usage"]["output_tokens"].as_u64().unwrap_or(0),
        };

        Ok(ProviderReply {
            content: if content.is_empty() { None } else { Some(content) },
            function_call,
            usage,
        })
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ProviderReply, ProviderError> {
        let body = self.build_request_body(messages, tools);

        debug!(model = %self.config.model, "Claude API request");

        let response = self
            .http
            .post(CLAUDE_API_URL)
            .timeout(self.config.timeout)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!("HTTP {status}: {text}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        self.parse_reply(json)
    }
}

#[async_trait]
impl ChatProvider for ClaudeProvider {
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> ProviderReply {
        match self.send(messages, tools).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "Claude request failed, degrading to content");
                ProviderReply::from_error(self.name(), &err)
            }
        }
    }

    fn name(&self) -> &str {
        "claude"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn provider() -> ClaudeProvider {
        ClaudeProvider::new(ClaudeConfig::new("test-key").with_max_tokens(128))
    }

    fn list_tables_tool() -> ToolDefinition {
        ToolDefinition {
            name: "listTables".to_string(),
            description: "List all tables.".to_string(),
            parameters: BTreeMap::new(),
        }
    }

    #[test]
    fn from_env_without_key_is_configuration_error() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        let err = ClaudeConfig::from_env()
            .err()
            .expect("missing key must fail");
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn system_message_lifted_out_of_messages() {
        let messages = vec![
            ChatMessage::system("You are a data assistant."),
            ChatMessage::user("list tables"),
        ];
        let body = provider().build_request_body(&messages, &[]);

        assert_eq!(body["system"], "You are a data assistant.");
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
    }

    #[test]
    fn function_role_becomes_tool_result_block() {
        let call = FunctionCall {
            id: "toolu_1".to_string(),
            name: "listTables".to_string(),
            arguments: serde_json::json!({}),
        };
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("list tables"),
            ChatMessage::assistant_call(None, call),
            ChatMessage::function("listTables", "{\"content\":\"[]\",\"isError\":false}"),
        ];
        let body = provider().build_request_body(&messages, &[]);
        let msgs = body["messages"].as_array().unwrap();

        let assistant_blocks = msgs[1]["content"].as_array().unwrap();
        assert_eq!(assistant_blocks[0]["type"], "tool_use");
        assert_eq!(assistant_blocks[0]["id"], "toolu_1");

        assert_eq!(msgs[2]["role"], "user");
        let result_blocks = msgs[2]["content"].as_array().unwrap();
        assert_eq!(result_blocks[0]["type"], "tool_result");
        assert_eq!(result_blocks[0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn orphaned_tool_result_rendered_as_plain_text() {
        // No assistant tool_use precedes the result, so there is no id to
        // reference; the block form would be rejected by the API.
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::function("listTables", "{\"content\":\"[]\",\"isError\":false}"),
            ChatMessage::user("thanks"),
        ];
        let body = provider().build_request_body(&messages, &[]);
        let msgs = body["messages"].as_array().unwrap();

        assert_eq!(msgs[0]["role"], "user");
        let text = msgs[0]["content"].as_str().unwrap();
        assert!(text.contains("listTables"));
        assert!(!body.to_string().contains("tool_use_id"));
    }

    #[test]
    fn empty_tool_schema_stays_well_formed() {
        let body = provider().build_request_body(&[ChatMessage::user("hi")], &[list_tables_tool()]);
        let schema = &body["tools"][0]["input_schema"];
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"].as_object().unwrap().is_empty());
    }

    #[test]
    fn parse_reply_extracts_text_and_tool_use() {
        let json = serde_json::json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_9", "name": "listTables", "input": {}},
            ],
            "usage": {"input_tokens": 11, "output_tokens": 7},
        });
        let reply = provider().parse_reply(json).unwrap();
        assert_eq!(reply.content.as_deref(), Some("Let me check."));
        let call = reply.function_call.unwrap();
        assert_eq!(call.name, "listTables");
        assert_eq!(call.id, "toolu_9");
        assert_eq!(reply.usage.total_tokens(), 18);
    }

    #[test]
    fn parse_reply_without_blocks_is_parse_error() {
        let err = provider().parse_reply(serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }
}
