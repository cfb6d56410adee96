//! Thread store: maps thread ids to in-memory conversation histories.
//!
//! The map is the engine's only shared mutable resource. All mutation
//! goes through the write lock; the background sweeper only ever removes
//! entries, so a removal racing an in-flight turn is resolved by the
//! next `get_or_create` recreating the thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{ChatMessage, Role};

/// One conversation: an ordered message history behind an opaque id.
///
/// Invariant: `messages[0]` is the system message from creation onward.
pub struct ConversationThread {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub last_access: Instant,
}

/// Thread-safe conversation store.
#[derive(Clone)]
pub struct ThreadStore {
    threads: Arc<RwLock<HashMap<String, ConversationThread>>>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self {
            threads: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fetch a thread, creating it with a single system message if the id
    /// is unknown. Atomic with respect to concurrent callers on the same
    /// id: exactly one creation, one system message. Updates the access
    /// time either way. Returns whether the thread was created.
    pub async fn get_or_create(&self, id: &str, system_prompt: &str) -> bool {
        let mut map = self.threads.write().await;
        match map.get_mut(id) {
            Some(thread) => {
                thread.last_access = Instant::now();
                false
            }
            None => {
                map.insert(
                    id.to_string(),
                    ConversationThread {
                        id: id.to_string(),
                        messages: vec![ChatMessage::system(system_prompt)],
                        last_access: Instant::now(),
                    },
                );
                true
            }
        }
    }

    /// Snapshot of a thread's history, empty if the id is unknown.
    pub async fn history(&self, id: &str) -> Vec<ChatMessage> {
        let map = self.threads.read().await;
        map.get(id).map(|t| t.messages.clone()).unwrap_or_default()
    }

    /// Append a message. A no-op when the thread was swept mid-turn.
    pub async fn append(&self, id: &str, message: ChatMessage) {
        let mut map = self.threads.write().await;
        match map.get_mut(id) {
            Some(thread) => thread.messages.push(message),
            None => tracing::debug!(thread_id = %id, "Append on expired thread dropped"),
        }
    }

    /// Trim a thread to `max_messages`, always keeping the system message
    /// at index 0 and dropping from the oldest non-system end.
    pub async fn trim(&self, id: &str, max_messages: usize) {
        let mut map = self.threads.write().await;
        let Some(thread) = map.get_mut(id) else {
            return;
        };
        if max_messages == 0 || thread.messages.len() <= max_messages {
            return;
        }
        debug_assert_eq!(thread.messages[0].role, Role::System);
        let excess = thread.messages.len() - max_messages;
        thread.messages.drain(1..1 + excess);
        // The cut can strand a tool result whose requesting assistant
        // message was dropped; an orphaned result is meaningless to
        // providers, so drop it too.
        while thread.messages.len() > 1 && thread.messages[1].role == Role::Function {
            thread.messages.remove(1);
        }
        tracing::debug!(thread_id = %id, dropped = excess, "Trimmed thread history");
    }

    /// Remove a thread entirely. Idempotent.
    pub async fn clear(&self, id: &str) {
        self.threads.write().await.remove(id);
    }

    /// Ids of all live threads.
    pub async fn list_active(&self) -> Vec<String> {
        self.threads.read().await.keys().cloned().collect()
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.threads.read().await.contains_key(id)
    }

    /// Number of live threads.
    pub async fn count(&self) -> usize {
        self.threads.read().await.len()
    }

    /// Remove threads idle longer than `ttl`. Returns how many were removed.
    pub async fn sweep(&self, ttl: Duration) -> usize {
        let mut map = self.threads.write().await;
        let now = Instant::now();
        let before = map.len();
        map.retain(|id, thread| {
            let stale = now.duration_since(thread.last_access) > ttl;
            if stale {
                tracing::info!(thread_id = %id, "Expiring idle thread");
            }
            !stale
        });
        before - map.len()
    }

    /// Spawn the idle-expiry sweeper: runs `sweep(ttl)` every `interval`
    /// until the returned handle is shut down.
    pub fn spawn_sweeper(&self, interval: Duration, ttl: Duration) -> SweeperHandle {
        let store = self.clone();
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so a fresh store
            // is not swept at startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep(ttl).await;
                        let remaining = store.count().await;
                        tracing::debug!(removed, remaining, "Sweeper tick");
                    }
                }
            }
        });
        SweeperHandle { token, handle }
    }
}

impl Default for ThreadStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the background sweeper task. Shutdown is deterministic:
/// cancel, then await the task.
pub struct SweeperHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYSTEM: &str = "You are a data assistant.";

    #[tokio::test]
    async fn creation_seeds_exactly_one_system_message() {
        let store = ThreadStore::new();
        let created = store.get_or_create("t1", SYSTEM).await;
        assert!(created);

        let history = store.history("t1").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content.as_deref(), Some(SYSTEM));

        // Second fetch does not re-seed.
        let created = store.get_or_create("t1", SYSTEM).await;
        assert!(!created);
        assert_eq!(store.history("t1").await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_creates_once() {
        let store = ThreadStore::new();
        let (a, b) = tokio::join!(
            store.get_or_create("race", SYSTEM),
            store.get_or_create("race", SYSTEM),
        );
        assert!(a ^ b, "exactly one caller creates");
        assert_eq!(store.history("race").await.len(), 1);
    }

    #[tokio::test]
    async fn trim_keeps_system_message_and_recent_tail() {
        let store = ThreadStore::new();
        store.get_or_create("t", SYSTEM).await;
        for i in 0..9 {
            store.append("t", ChatMessage::user(format!("msg {i}"))).await;
        }

        store.trim("t", 4).await;
        let history = store.history("t").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[1].content.as_deref(), Some("msg 6"));
        assert_eq!(history[2].content.as_deref(), Some("msg 7"));
        assert_eq!(history[3].content.as_deref(), Some("msg 8"));
    }

    #[tokio::test]
    async fn trim_drops_tool_result_orphaned_by_the_cut() {
        let store = ThreadStore::new();
        store.get_or_create("t", SYSTEM).await;
        let call = crate::FunctionCall {
            id: "call-1".to_string(),
            name: "listTables".to_string(),
            arguments: serde_json::json!({}),
        };
        store.append("t", ChatMessage::user("list tables")).await;
        store
            .append("t", ChatMessage::assistant_call(None, call))
            .await;
        store
            .append(
                "t",
                ChatMessage::function("listTables", "{\"content\":\"[]\",\"isError\":false}"),
            )
            .await;
        store.append("t", ChatMessage::user("thanks")).await;
        store.append("t", ChatMessage::assistant("welcome")).await;

        // The cut lands between the assistant call and its result.
        store.trim("t", 4).await;
        let history = store.history("t").await;
        assert!(history.iter().all(|m| m.role != Role::Function));
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[1].content.as_deref(), Some("thanks"));
        assert_eq!(history[2].content.as_deref(), Some("welcome"));
    }

    #[tokio::test]
    async fn trim_is_noop_under_limit() {
        let store = ThreadStore::new();
        store.get_or_create("t", SYSTEM).await;
        store.append("t", ChatMessage::user("hello")).await;
        store.trim("t", 10).await;
        assert_eq!(store.history("t").await.len(), 2);
    }

    #[tokio::test]
    async fn append_on_missing_thread_is_dropped() {
        let store = ThreadStore::new();
        store.append("ghost", ChatMessage::user("hello")).await;
        assert!(!store.exists("ghost").await);
        assert!(store.history("ghost").await.is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_idle_threads_only() {
        let store = ThreadStore::new();
        store.get_or_create("old", SYSTEM).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.get_or_create("fresh", SYSTEM).await;

        let removed = store.sweep(Duration::from_millis(10)).await;
        assert_eq!(removed, 1);
        assert!(!store.exists("old").await);
        assert!(store.exists("fresh").await);

        // A swept id comes back as a brand-new thread.
        let created = store.get_or_create("old", SYSTEM).await;
        assert!(created);
        assert_eq!(store.history("old").await.len(), 1);
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let store = ThreadStore::new();
        store.get_or_create("t", SYSTEM).await;
        store.clear("t").await;
        store.clear("t").await;
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn sweeper_task_shuts_down_cleanly() {
        let store = ThreadStore::new();
        store.get_or_create("t", SYSTEM).await;
        let sweeper = store.spawn_sweeper(Duration::from_millis(5), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(25)).await;
        sweeper.shutdown().await;
        assert_eq!(store.count().await, 0);
    }
}
