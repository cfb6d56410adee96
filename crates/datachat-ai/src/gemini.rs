//! Google Gemini adapter.
//!
//! Implements [`ChatProvider`] for Gemini models via the Generative
//! Language API. Canonical roles map to Gemini's: `assistant` -> `model`,
//! `function` -> a `user` turn carrying a `functionResponse` part, and
//! `system` -> `systemInstruction`. Gemini does not assign call ids, so
//! the adapter mints one per parsed `functionCall`.

use async_trait::async_trait;
use tracing::debug;

use datachat_common::{new_id, EngineError, ProviderError};

use crate::{ChatMessage, ChatProvider, FunctionCall, ProviderReply, Role, TokenUsage, ToolDefinition};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini adapter configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout: std::time::Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gemini-2.0-flash".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            timeout: std::time::Duration::from_secs(60),
        }
    }

    /// Create config from the `GEMINI_API_KEY` environment variable.
    pub fn from_env() -> datachat_common::Result<Self> {
        let key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| EngineError::Configuration("GEMINI_API_KEY not set".into()))?;
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

/// Gemini API adapter.
pub struct GeminiProvider {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_BASE, self.config.model, self.config.api_key
        )
    }

    /// Build the JSON request body for generateContent.
    fn build_request_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> serde_json::Value {
        let mut contents = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => continue, // handled via systemInstruction
                Role::User => {
                    contents.push(serde_json::json!({
                        "role": "user",
                        "parts": [{"text": msg.content.clone().unwrap_or_default()}],
                    }));
                }
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if let Some(text) = msg.content.as_deref().filter(|t| !t.is_empty()) {
                        parts.push(serde_json::json!({"text": text}));
                    }
                    if let Some(call) = &msg.function_call {
                        parts.push(serde_json::json!({
                            "functionCall": {"name": call.name, "args": call.arguments},
                        }));
                    }
                    contents.push(serde_json::json!({"role": "model", "parts": parts}));
                }
                Role::Function => {
                    let text = msg.content.clone().unwrap_or_default();
                    // functionResponse.response must be an object.
                    let response = serde_json::from_str::<serde_json::Value>(&text)
                        .ok()
                        .filter(serde_json::Value::is_object)
                        .unwrap_or_else(|| serde_json::json!({"content": text}));
                    contents.push(serde_json::json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {
                                "name": msg.name.clone().unwrap_or_default(),
                                "response": response,
                            },
                        }],
                    }));
                }
            }
        }

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": self.config.max_tokens,
                "temperature": self.config.temperature,
            },
        });

        for msg in messages {
            if msg.role == Role::System {
                body["systemInstruction"] = serde_json::json!({
                    "parts": [{"text": msg.content.clone().unwrap_or_default()}],
                });
                break;
            }
        }

        if !tools.is_empty() {
            let declarations: Vec<_> = tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.json_schema(),
                    })
                })
                .collect();
            body["tools"] = serde_json::json!([{"functionDeclarations": declarations}]);
        }

        body
    }

    /// Parse a generateContent response into the canonical reply shape.
    fn parse_reply(&self, json: serde_json::Value) -> Result<ProviderReply, ProviderError> {
        let candidates = json["candidates"]
            .as_array()
            .ok_or_else(|| ProviderError::Parse("no candidates in response".to_string()))?;

        let first = candidates
            .first()
            .ok_or_else(|| ProviderError::Parse("empty candidates".to_string()))?;

        let parts = first["content"]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let mut content = String::new();
        let mut function_call = None;

        for part in &parts {
            if let Some(text) = part["text"].as_str() {
                content.push_str(text);
            }
            if function_call.is_none() {
                if let Some(fc) = part.get("functionCall") {
                    function_call = Some(FunctionCall {
                        id: new_id(),
                        name: fc["name"].as_str().unwrap_or_default().to_string(),
                        arguments: fc["args"].clone(),
                    });
                }
            }
        }

        let usage = TokenUsage {
            input_tokens: json["usageMetadata"]["promptTokenCount"]
                .as_u64()
                .unwrap_or(0),
            output_tokens: json["usageMetadata"]["candidatesTokenCount"]
                .as_u64()
                .unwrap_or(0),
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
        let url = self.api_url();

        debug!(model = %self.config.model, "Gemini API request");

        let response = self
            .http
            .post(&url)
            .timeout(self.config.timeout)
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
impl ChatProvider for GeminiProvider {
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> ProviderReply {
        match self.send(messages, tools).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "Gemini request failed, degrading to content");
                ProviderReply::from_error(self.name(), &err)
            }
        }
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
