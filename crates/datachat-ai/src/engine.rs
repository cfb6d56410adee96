//! Conversation orchestrator.
//!
//! `Engine` drives the per-turn loop: resolve the thread, send the
//! canonical history plus tool schemas to the provider, dispatch any
//! requested tool call through the registry, feed the result back, and
//! repeat until the model answers in text or the iteration cap is hit.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use datachat_common::new_id;

use crate::registry::ToolRegistry;
use crate::store::{SweeperHandle, ThreadStore};
use crate::token_tracker::TokenTracker;
use crate::{ChatMessage, ChatProvider, TokenUsage};

/// Returned when the model keeps requesting tools past the iteration cap.
pub const TRUNCATION_MESSAGE: &str =
    "The conversation was cut short: the tool-call limit for this turn was reached.";

/// Returned when no chat provider has been configured.
pub const NO_PROVIDER_MESSAGE: &str =
    "No AI provider is configured. Set up a provider and try again.";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Standing instructions seeded as every thread's first message.
    pub system_prompt: String,
    /// Cap on provider round-trips within a single user turn.
    pub max_iterations: u32,
    /// Cap on stored messages per thread; the system message never counts
    /// against the oldest-first drop.
    pub max_history: usize,
    /// Idle time after which a thread is expired.
    pub thread_ttl: Duration,
    /// How often the sweeper looks for idle threads.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant with access to data tools.".to_string(),
            max_iterations: 10,
            max_history: 40,
            thread_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    pub fn with_thread_ttl(mut self, ttl: Duration) -> Self {
        self.thread_ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Result of one user turn.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOutcome {
    pub success: bool,
    pub response: String,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Active-thread listing exposed to callers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveThreads {
    pub count: usize,
    pub thread_ids: Vec<String>,
}

/// The tool-calling conversation engine.
///
/// Holds the thread store, the tool registry, and at most one provider.
/// Multiple engines can coexist in one process; nothing here is global.
pub struct Engine {
    config: EngineConfig,
    store: ThreadStore,
    registry: Arc<ToolRegistry>,
    provider: Option<Arc<dyn ChatProvider>>,
    tracker: Mutex<TokenTracker>,
}

impl Engine {
    pub fn new(config: EngineConfig, registry: ToolRegistry) -> Self {
        Self {
            config,
            store: ThreadStore::new(),
            registry: Arc::new(registry),
            provider: None,
            tracker: Mutex::new(TokenTracker::new()),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start the idle-thread sweeper for this engine's store.
    pub fn start_sweeper(&self) -> SweeperHandle {
        self.store
            .spawn_sweeper(self.config.sweep_interval, self.config.thread_ttl)
    }

    /// Total token usage across all turns so far.
    pub fn usage(&self) -> TokenUsage {
        self.tracker
            .lock()
            .map(|t| t.total().clone())
            .unwrap_or_default()
    }

    /// Number of provider calls made across all turns so far.
    pub fn provider_call_count(&self) -> u64 {
        self.tracker.lock().map(|t| t.call_count()).unwrap_or(0)
    }

    /// Handle one user turn. Omitting `thread_id` starts a new thread.
    ///
    /// Never returns an error: configuration problems, provider failures,
    /// and tool failures all surface as response content.
    pub async fn chat(&self, thread_id: Option<&str>, message: &str) -> ChatOutcome {
        let id = thread_id.map(str::to_string).unwrap_or_else(new_id);

        // No provider: short-circuit before any store side effects. The id
        // is still returned so the caller's history lookups stay valid.
        let Some(provider) = &self.provider else {
            warn!("Chat request with no provider configured");
            return ChatOutcome {
                success: false,
                response: NO_PROVIDER_MESSAGE.to_string(),
                thread_id: id,
                error: Some("no chat provider configured".to_string()),
            };
        };

        self.store.get_or_create(&id, &self.config.system_prompt).await;
        self.store.append(&id, ChatMessage::user(message)).await;
        self.store.trim(&id, self.config.max_history).await;

        let mut messages = self.store.history(&id).await;
        let tools = self.registry.definitions();

        for iteration in 0..self.config.max_iterations {
            let reply = provider.chat(&messages, &tools).await;
            if let Ok(mut tracker) = self.tracker.lock() {
                tracker.record(provider.name(), &reply.usage);
            }

            let Some(call) = reply.function_call else {
                // Final answer for this turn.
                let content = reply.content.unwrap_or_default();
                self.store.append(&id, ChatMessage::assistant(&content)).await;
                return ChatOutcome {
                    success: true,
                    response: content,
                    thread_id: id,
                    error: None,
                };
            };

            // The model asked for a tool. Content alongside the call is
            // kept on the assistant message but is not treated as final.
            debug!(thread_id = %id, iteration, tool = %call.name, "Dispatching tool call");
            let assistant = ChatMessage::assistant_call(reply.content, call.clone());
            messages.push(assistant.clone());
            self.store.append(&id, assistant).await;

            let result = self.registry.execute(&call.name, &call.arguments);
            let function = ChatMessage::function(&call.name, result.to_json());
            messages.push(function.clone());
            self.store.append(&id, function).await;
        }

        // Cap exhausted: terminal but non-fatal.
        warn!(thread_id = %id, cap = self.config.max_iterations, "Tool-call loop hit iteration cap");
        self.store
            .append(&id, ChatMessage::assistant(TRUNCATION_MESSAGE))
            .await;
        ChatOutcome {
            success: true,
            response: TRUNCATION_MESSAGE.to_string(),
            thread_id: id,
            error: None,
        }
    }

    /// Ordered history for a thread; empty if the id is unknown.
    pub async fn history(&self, thread_id: &str) -> Vec<ChatMessage> {
        self.store.history(thread_id).await
    }

    /// Drop a thread entirely. Idempotent.
    pub async fn clear(&self, thread_id: &str) {
        self.store.clear(thread_id).await;
    }

    pub async fn list_active(&self) -> ActiveThreads {
        let thread_ids = self.store.list_active().await;
        ActiveThreads {
            count: thread_ids.len(),
            thread_ids,
        }
    }
}
