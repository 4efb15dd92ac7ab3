use super::message::Event;
use crate::models::AgentId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

/// A subscriber handler. Implementations must be treated as untrusted:
/// each invocation is isolated so one handler's failure never stops
/// delivery to siblings (design notes: "callback-driven subscribers").
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

struct Subscription {
    agent_id: AgentId,
    handler: Arc<dyn EventHandler>,
}

/// Insertion-ordered, per-event-type subscriber registry.
#[derive(Clone)]
pub struct EventRegistry {
    subscriptions: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn subscribe(
        &self,
        event_type: &str,
        agent_id: AgentId,
        handler: Arc<dyn EventHandler>,
    ) {
        let mut subs = self.subscriptions.write().await;
        subs.entry(event_type.to_string())
            .or_default()
            .push(Subscription { agent_id, handler });
    }

    pub async fn unsubscribe(&self, event_type: &str, agent_id: &AgentId) {
        let mut subs = self.subscriptions.write().await;
        if let Some(list) = subs.get_mut(event_type) {
            list.retain(|s| &s.agent_id != agent_id);
        }
    }

    /// Removes an agent from every event type it's subscribed to, used by
    /// the heartbeat sweeper when a connection is torn down.
    pub async fn unsubscribe_all(&self, agent_id: &AgentId) {
        let mut subs = self.subscriptions.write().await;
        for list in subs.values_mut() {
            list.retain(|s| &s.agent_id != agent_id);
        }
    }

    /// Returns the subscriber agent ids for an event type, in registration
    /// order, without invoking handlers — used to build the derived
    /// system message's recipient set.
    pub async fn subscriber_ids(&self, event_type: &str) -> Vec<AgentId> {
        let subs = self.subscriptions.read().await;
        subs.get(event_type)
            .map(|list| list.iter().map(|s| s.agent_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Dispatches an event to every subscriber in registration order.
    /// A handler panic/error is logged and does not stop the remaining
    /// handlers from running.
    pub async fn dispatch(&self, event: &Event) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subs = self.subscriptions.read().await;
            subs.get(&event.event_type)
                .map(|list| list.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                error!(
                    "Event handler for '{}' failed: {}",
                    event.event_type, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("boom"))
        }
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_siblings() {
        let registry = EventRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        registry
            .subscribe("task:created", "a1".to_string(), Arc::new(FailingHandler))
            .await;
        registry
            .subscribe(
                "task:created",
                "a2".to_string(),
                Arc::new(CountingHandler(count.clone())),
            )
            .await;

        let event = Event {
            event_type: "task:created".to_string(),
            payload: HashMap::new(),
            source: None,
            timestamp: Utc::now(),
        };
        registry.dispatch(&event).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_noop() {
        let registry = EventRegistry::new();
        let event = Event {
            event_type: "system:startup".to_string(),
            payload: HashMap::new(),
            source: None,
            timestamp: Utc::now(),
        };
        registry.dispatch(&event).await; // should not panic
        assert!(registry.subscriber_ids("system:startup").await.is_empty());
    }
}
