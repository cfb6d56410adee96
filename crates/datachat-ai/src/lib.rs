//! Tool-calling conversation engine for datachat.
//!
//! Provides Claude and Gemini API clients behind one canonical
//! message model, plus:
//! - Tool registry with argument validation and coercion
//! - Bounded per-turn tool-call loops
//! - In-memory thread store with idle expiry
//! - Token usage tracking

pub mod claude;
pub mod engine;
pub mod gemini;
pub mod registry;
pub mod store;
pub mod token_tracker;

use std::collections::BTreeMap;

use async_trait::async_trait;

pub use claude::{ClaudeConfig, ClaudeProvider};
pub use datachat_common::{ProviderError, RegistryError, ToolError};
pub use engine::{ActiveThreads, ChatOutcome, Engine, EngineConfig};
pub use gemini::{GeminiConfig, GeminiProvider};
pub use registry::{FunctionResult, ToolProvider, ToolRegistration, ToolRegistry};
pub use store::{SweeperHandle, ThreadStore};
pub use token_tracker::TokenTracker;

/// An LLM backend normalized to the canonical message model.
///
/// `chat` is infallible by design: adapters degrade transport and parse
/// failures into a content-only [`ProviderReply`] so the orchestrator
/// always receives a well-formed response.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> ProviderReply;

    /// Provider name, for logging and usage tracking only.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// Nullable for assistant messages that only carry a function call.
    pub content: Option<String>,
    /// Function-role messages only: the tool that produced this result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Present only on assistant messages requesting a call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            name: None,
            function_call: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            name: None,
            function_call: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            name: None,
            function_call: None,
        }
    }

    /// Assistant message requesting a tool call. Content is kept when the
    /// model produced text alongside the call.
    pub fn assistant_call(content: Option<String>, call: FunctionCall) -> Self {
        Self {
            role: Role::Assistant,
            content,
            name: None,
            function_call: Some(call),
        }
    }

    /// Function-role message carrying a serialized tool result.
    pub fn function(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: Some(content.into()),
            name: Some(tool_name.into()),
            function_call: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

/// A tool call parsed out of model output by a provider adapter.
///
/// The `id` is backend-assigned where the backend has one (Claude
/// `tool_use` ids) and minted by the adapter otherwise; it is needed to
/// round-trip results through backends that address them by call id.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Canonical provider response: final text, a requested tool call, or both.
#[derive(Debug, Clone, Default)]
pub struct ProviderReply {
    pub content: Option<String>,
    pub function_call: Option<FunctionCall>,
    pub usage: TokenUsage,
}

impl ProviderReply {
    /// Degrade a transport/parse failure into a content-only reply so the
    /// conversation loop can end the turn gracefully.
    pub fn from_error(provider: &str, err: &ProviderError) -> Self {
        Self {
            content: Some(format!("[{provider} provider error] {err}")),
            function_call: None,
            usage: TokenUsage::default(),
        }
    }
}

/// A callable operation described to the model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Parameter name -> spec. `BTreeMap` keeps schema output deterministic.
    pub parameters: BTreeMap<String, ParamSpec>,
}

impl ToolDefinition {
    /// JSON-schema-shaped parameters object. Always well-formed: a tool
    /// with no parameters still gets an empty `properties` object.
    pub fn json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, spec) in &self.parameters {
            properties.insert(
                name.clone(),
                serde_json::json!({
                    "type": spec.kind.json_type(),
                    "description": spec.description,
                }),
            );
            if spec.required {
                required.push(serde_json::Value::String(name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}
