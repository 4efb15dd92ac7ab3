//! 4.A Message Bus: routing, pub/sub, offline queueing, heartbeats.
//!
//! Directed delivery is synchronous to a connected recipient's handler;
//! otherwise the message lands in a bounded per-agent offline queue that a
//! background sweeper retries every few seconds. A second background loop
//! watches heartbeats and disconnects agents that have gone silent.

pub mod events;
pub mod message;
pub mod queue;

pub use events::EventHandler;
pub use message::{Event, Message, MessageContent, MessageType, Recipient};

use crate::capabilities::IdGenerator;
use crate::config::BusConfig;
use crate::error::{KernelError, Result};
use crate::models::{AgentId, MessageId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use events::EventRegistry;
use queue::OfflineQueues;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handler a connected agent registers to receive directed/broadcast
/// messages synchronously.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: Message);
}

/// Narrow seam the other components publish through, so the Task Manager,
/// File Manager, Health Monitor, etc. depend only on "can emit an event" and
/// never reach into the bus's queues/subscriptions it exclusively owns.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn emit(&self, event_type: &str, payload: HashMap<String, serde_json::Value>, source: Option<AgentId>);
}

#[async_trait]
impl EventPublisher for MessageBus {
    async fn emit(&self, event_type: &str, payload: HashMap<String, serde_json::Value>, source: Option<AgentId>) {
        if let Err(e) = self.publish(event_type, payload, source).await {
            error!("Failed to publish event {}: {}", event_type, e);
        }
    }
}

/// Mirror seam for subscribing: lets a component wait on another's
/// published events (e.g. the Workflow Orchestrator waiting on
/// `task:completed`) without depending on the bus's connection table.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn subscribe(&self, event_type: &str, agent_id: AgentId, handler: Arc<dyn EventHandler>);
    async fn unsubscribe(&self, event_type: &str, agent_id: &AgentId);
}

#[async_trait]
impl EventSubscriber for MessageBus {
    async fn subscribe(&self, event_type: &str, agent_id: AgentId, handler: Arc<dyn EventHandler>) {
        self.inner.events.subscribe(event_type, agent_id, handler).await;
    }

    async fn unsubscribe(&self, event_type: &str, agent_id: &AgentId) {
        self.inner.events.unsubscribe(event_type, agent_id).await;
    }
}

/// Narrow seam Realtime Sync sends wire messages through, without
/// depending on the bus's connection table or offline queues directly.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn broadcast_sync(&self, content: MessageContent) -> Result<()>;
    async fn send_sync(&self, to: AgentId, content: MessageContent) -> Result<()>;
}

#[async_trait]
impl SyncTransport for MessageBus {
    async fn broadcast_sync(&self, content: MessageContent) -> Result<()> {
        self.broadcast("system".to_string(), MessageType::System, content, false).await.map(|_| ())
    }

    async fn send_sync(&self, to: AgentId, content: MessageContent) -> Result<()> {
        let message = Message {
            id: self.inner.id_gen.next_id(),
            sender: "system".to_string(),
            recipient: Recipient::Direct(to),
            message_type: MessageType::System,
            content,
            timestamp: Utc::now(),
            requires_response: false,
            correlation_id: None,
            is_notification: false,
        };
        self.send(message).await.map(|_| ())
    }
}

struct Connection {
    handler: Arc<dyn MessageHandler>,
    last_heartbeat: DateTime<Utc>,
}

#[derive(Default)]
struct AgentHistory {
    order: Vec<MessageId>,
    seen: HashSet<MessageId>,
}

impl AgentHistory {
    fn record(&mut self, id: &MessageId) {
        if self.seen.insert(id.clone()) {
            self.order.push(id.clone());
        }
    }
}

struct Inner {
    config: BusConfig,
    heartbeat_timeout: std::time::Duration,
    id_gen: Arc<dyn IdGenerator>,
    connections: RwLock<HashMap<AgentId, Connection>>,
    offline: OfflineQueues,
    events: EventRegistry,
    history: Mutex<HashMap<AgentId, AgentHistory>>,
    all_messages: RwLock<HashMap<MessageId, Message>>,
    notifications_read: Mutex<HashSet<MessageId>>,
    queue_sweeper: Mutex<Option<JoinHandle<()>>>,
    heartbeat_sweeper: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<Inner>,
}

impl MessageBus {
    pub fn new(config: BusConfig, heartbeat_timeout: std::time::Duration, id_gen: Arc<dyn IdGenerator>) -> Self {
        let offline = OfflineQueues::new(config.queue_size);
        Self {
            inner: Arc::new(Inner {
                config,
                heartbeat_timeout,
                id_gen,
                connections: RwLock::new(HashMap::new()),
                offline,
                events: EventRegistry::new(),
                history: Mutex::new(HashMap::new()),
                all_messages: RwLock::new(HashMap::new()),
                notifications_read: Mutex::new(HashSet::new()),
                queue_sweeper: Mutex::new(None),
                heartbeat_sweeper: Mutex::new(None),
            }),
        }
    }

    /// Starts the offline-queue sweeper and heartbeat sweeper loops.
    pub async fn start(&self) {
        let sweep_interval = self.inner.config.sweep_interval;
        let queue_self = self.clone();
        let queue_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                queue_self.sweep_offline_queues().await;
            }
        });
        *self.inner.queue_sweeper.lock().await = Some(queue_handle);

        let heartbeat_self = self.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                interval.tick().await;
                heartbeat_self.sweep_heartbeats().await;
            }
        });
        *self.inner.heartbeat_sweeper.lock().await = Some(heartbeat_handle);

        info!("Message bus sweepers started");
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.queue_sweeper.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.inner.heartbeat_sweeper.lock().await.take() {
            handle.abort();
        }
        info!("Message bus shut down");
    }

    pub async fn connect(&self, agent_id: AgentId, handler: Arc<dyn MessageHandler>) {
        {
            let mut connections = self.inner.connections.write().await;
            connections.insert(
                agent_id.clone(),
                Connection {
                    handler,
                    last_heartbeat: Utc::now(),
                },
            );
        }
        info!("Agent {} connected to message bus", agent_id);
        self.deliver_queued(&agent_id).await;
    }

    pub async fn disconnect(&self, agent_id: &AgentId) {
        self.inner.connections.write().await.remove(agent_id);
        self.inner.events.unsubscribe_all(agent_id).await;
        info!("Agent {} disconnected from message bus", agent_id);
    }

    pub async fn is_connected(&self, agent_id: &AgentId) -> bool {
        self.inner.connections.read().await.contains_key(agent_id)
    }

    pub async fn update_heartbeat(&self, agent_id: &AgentId) -> Result<()> {
        let mut connections = self.inner.connections.write().await;
        match connections.get_mut(agent_id) {
            Some(conn) => {
                conn.last_heartbeat = Utc::now();
                Ok(())
            }
            None => Err(KernelError::not_found(format!(
                "agent {agent_id} is not connected"
            ))),
        }
    }

    /// Directed or broadcast delivery. Validation errors fail synchronously
    /// before any delivery is attempted; a delivery failure to one
    /// recipient never prevents delivery to the others.
    pub async fn send(&self, message: Message) -> Result<MessageId> {
        message
            .validate()
            .map_err(KernelError::validation)?;

        let recipients = message.recipient.agents();
        for agent_id in &recipients {
            self.deliver_to(agent_id, &message).await;
        }
        self.record_history(&message.sender, &message.id).await;

        {
            let mut all = self.inner.all_messages.write().await;
            all.insert(message.id.clone(), message.clone());
        }

        Ok(message.id)
    }

    /// Broadcasts to every currently connected agent, assigning one id
    /// shared by all recipients.
    pub async fn broadcast(
        &self,
        sender: AgentId,
        message_type: MessageType,
        content: MessageContent,
        requires_response: bool,
    ) -> Result<MessageId> {
        let targets: Vec<AgentId> = {
            let connections = self.inner.connections.read().await;
            connections.keys().filter(|id| **id != sender).cloned().collect()
        };

        let message = Message {
            id: self.inner.id_gen.next_id(),
            sender,
            recipient: Recipient::Broadcast(targets),
            message_type,
            content,
            timestamp: Utc::now(),
            requires_response,
            correlation_id: None,
            is_notification: false,
        };

        self.send(message.clone()).await?;
        Ok(message.id)
    }

    /// Publishes a pub/sub event: subscribers run in registration order,
    /// then a derived system message is produced for durability.
    pub async fn publish(&self, event_type: &str, payload: HashMap<String, serde_json::Value>, source: Option<AgentId>) -> Result<()> {
        let event = Event {
            event_type: event_type.to_string(),
            payload: payload.clone(),
            source: source.clone(),
            timestamp: Utc::now(),
        };

        self.inner.events.dispatch(&event).await;

        let subscriber_ids = self.inner.events.subscriber_ids(event_type).await;
        if subscriber_ids.is_empty() {
            return Ok(());
        }

        let message = Message {
            id: self.inner.id_gen.next_id(),
            sender: source.unwrap_or_else(|| "system".to_string()),
            recipient: Recipient::Broadcast(subscriber_ids),
            message_type: MessageType::System,
            content: MessageContent::DomainEvent {
                event_type: event_type.to_string(),
                payload: serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
            },
            timestamp: event.timestamp,
            requires_response: false,
            correlation_id: None,
            is_notification: false,
        };
        self.send(message).await.map(|_| ())
    }

    pub async fn subscribe(&self, event_type: &str, agent_id: AgentId, handler: Arc<dyn EventHandler>) {
        self.inner.events.subscribe(event_type, agent_id, handler).await;
    }

    pub async fn unsubscribe(&self, event_type: &str, agent_id: &AgentId) {
        self.inner.events.unsubscribe(event_type, agent_id).await;
    }

    pub async fn queue_size(&self, agent_id: Option<&AgentId>) -> usize {
        match agent_id {
            Some(id) => self.inner.offline.size(id).await,
            None => {
                let mut total = 0;
                for id in self.inner.offline.agents_with_queued().await {
                    total += self.inner.offline.size(&id).await;
                }
                total
            }
        }
    }

    pub async fn mark_notification_read(&self, message_id: &MessageId) {
        self.inner.notifications_read.lock().await.insert(message_id.clone());
    }

    pub async fn is_notification_read(&self, message_id: &MessageId) -> bool {
        self.inner.notifications_read.lock().await.contains(message_id)
    }

    pub async fn search(&self, query: &str, agent_id: Option<&AgentId>) -> Vec<Message> {
        let query = query.to_lowercase();
        let all = self.inner.all_messages.read().await;
        all.values()
            .filter(|m| {
                let matches_query = m.searchable_text().to_lowercase().contains(&query);
                let matches_agent = match agent_id {
                    None => true,
                    Some(id) => &m.sender == id || m.recipient.agents().contains(id),
                };
                matches_query && matches_agent
            })
            .cloned()
            .collect()
    }

    /// Messages exchanged between `a` and `b`, most recent first, limited
    /// to `limit` entries.
    pub async fn history(&self, a: &AgentId, b: &AgentId, limit: usize) -> Vec<Message> {
        let history = self.inner.history.lock().await;
        let all = self.inner.all_messages.read().await;

        let ids = history.get(a).map(|h| h.order.clone()).unwrap_or_default();
        let mut between: Vec<Message> = ids
            .into_iter()
            .filter_map(|id| all.get(&id).cloned())
            .filter(|m| {
                let counterpart_is_b = &m.sender == b || m.recipient.agents().contains(b);
                let involves_a = &m.sender == a || m.recipient.agents().contains(a);
                involves_a && counterpart_is_b
            })
            .collect();

        between.sort_by_key(|m| m.timestamp);
        if between.len() > limit {
            between.split_off(between.len() - limit)
        } else {
            between
        }
    }

    async fn deliver_to(&self, agent_id: &AgentId, message: &Message) {
        let handler = {
            let connections = self.inner.connections.read().await;
            connections.get(agent_id).map(|c| c.handler.clone())
        };

        match handler {
            Some(handler) => {
                handler.on_message(message.clone()).await;
                self.record_history(agent_id, &message.id).await;
            }
            None => {
                self.inner.offline.enqueue(agent_id, message.clone()).await;
                debug!("Agent {} offline, queued message {}", agent_id, message.id);
            }
        }
    }

    async fn deliver_queued(&self, agent_id: &AgentId) {
        let queued = self.inner.offline.drain(agent_id).await;
        if queued.is_empty() {
            return;
        }
        let handler = {
            let connections = self.inner.connections.read().await;
            connections.get(agent_id).map(|c| c.handler.clone())
        };
        if let Some(handler) = handler {
            for message in queued {
                handler.on_message(message.clone()).await;
                self.record_history(agent_id, &message.id).await;
            }
        }
    }

    async fn record_history(&self, agent_id: &AgentId, message_id: &MessageId) {
        let mut history = self.inner.history.lock().await;
        history.entry(agent_id.clone()).or_default().record(message_id);
    }

    async fn sweep_offline_queues(&self) {
        let agents = self.inner.offline.agents_with_queued().await;
        for agent_id in agents {
            if self.is_connected(&agent_id).await {
                self.deliver_queued(&agent_id).await;
            }
        }
    }

    async fn sweep_heartbeats(&self) {
        let stale: Vec<AgentId> = {
            let connections = self.inner.connections.read().await;
            let now = Utc::now();
            connections
                .iter()
                .filter(|(_, conn)| {
                    let age = now.signed_duration_since(conn.last_heartbeat);
                    age.num_milliseconds() > self.inner.heartbeat_timeout.as_millis() as i64
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        for agent_id in stale {
            warn!("Agent {} heartbeat timed out, disconnecting", agent_id);
            self.disconnect(&agent_id).await;
            let mut payload = HashMap::new();
            payload.insert(
                "agent_id".to_string(),
                serde_json::Value::String(agent_id.clone()),
            );
            if let Err(e) = self.publish(crate::events::AGENT_DESTROYED, payload, None).await {
                error!("Failed to publish agent:destroyed for {}: {}", agent_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::UuidGenerator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct RecordingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn on_message(&self, _message: Message) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bus() -> MessageBus {
        MessageBus::new(
            BusConfig {
                queue_size: 10,
                retry_attempts: 3,
                message_timeout: Duration::from_secs(30),
                sweep_interval: Duration::from_secs(5),
            },
            Duration::from_secs(60),
            Arc::new(UuidGenerator),
        )
    }

    fn direct_message(id: &str, sender: &str, recipient: &str) -> Message {
        Message {
            id: id.to_string(),
            sender: sender.to_string(),
            recipient: Recipient::Direct(recipient.to_string()),
            message_type: MessageType::Notification,
            content: MessageContent::Notification {
                text: "hello".to_string(),
            },
            timestamp: Utc::now(),
            requires_response: false,
            correlation_id: None,
            is_notification: true,
        }
    }

    #[tokio::test]
    async fn direct_delivery_to_connected_agent() {
        let bus = bus();
        let count = Arc::new(AtomicUsize::new(0));
        bus.connect("b".to_string(), Arc::new(RecordingHandler(count.clone())))
            .await;

        bus.send(direct_message("m1", "a", "b")).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let history = bus.history(&"a".to_string(), &"b".to_string(), 10).await;
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn offline_message_is_queued_then_delivered_on_connect() {
        let bus = bus();
        bus.send(direct_message("m1", "a", "b")).await.unwrap();
        assert_eq!(bus.queue_size(Some(&"b".to_string())).await, 1);

        let count = Arc::new(AtomicUsize::new(0));
        bus.connect("b".to_string(), Arc::new(RecordingHandler(count.clone())))
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.queue_size(Some(&"b".to_string())).await, 0);
    }

    #[tokio::test]
    async fn validation_rejects_empty_fields() {
        let bus = bus();
        let mut message = direct_message("", "a", "b");
        message.id = String::new();
        assert!(bus.send(message).await.is_err());
    }

    #[tokio::test]
    async fn history_dedupes_by_message_id() {
        let bus = bus();
        let count = Arc::new(AtomicUsize::new(0));
        bus.connect("b".to_string(), Arc::new(RecordingHandler(count)))
            .await;
        bus.send(direct_message("dup", "a", "b")).await.unwrap();
        // Resending with same id should not duplicate history entries.
        bus.send(direct_message("dup", "a", "b")).await.unwrap();
        let history = bus.history(&"a".to_string(), &"b".to_string(), 10).await;
        assert_eq!(history.len(), 1);
    }
}
