//! 4.H Realtime Sync: a derived mirror of agent/task/file/collaboration
//! state for late joiners and cross-agent broadcast. Owns no primary
//! state itself — every snapshot field comes from [`SnapshotSource`],
//! implemented by the Coordination Manager, the only component that can
//! see across A/B/C/G (§3 ownership).

use crate::bus::{Event, EventHandler, EventPublisher, EventSubscriber, MessageContent, SyncTransport};
use crate::capabilities::Clock;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::events;
use crate::models::AgentId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Mutation events mirrored into the sync queue, minus the bus's own
/// internal health-check and the workflow/system channels, which are not
/// part of the late-joiner snapshot surface.
const MIRRORED_EVENT_TYPES: &[&str] = &[
    events::AGENT_CREATED,
    events::AGENT_DESTROYED,
    events::AGENT_STATUS_CHANGED,
    events::AGENT_ERROR,
    events::TASK_CREATED,
    events::TASK_ASSIGNED,
    events::TASK_STARTED,
    events::TASK_COMPLETED,
    events::TASK_FAILED,
    events::FILE_LOCKED,
    events::FILE_UNLOCKED,
    events::FILE_MODIFIED,
    events::FILE_CONFLICT,
    events::COLLABORATION_STARTED,
    events::COLLABORATION_ENDED,
    events::COLLABORATION_JOINED,
    events::COLLABORATION_LEFT,
];

const SYNC_SUBSCRIBER_ID: &str = "realtime-sync";

/// Read-only snapshot accessors over the state A/B/C/G each exclusively
/// own, implemented by the Coordination Manager so Realtime Sync never
/// reaches into another component's map directly.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn agents_snapshot(&self) -> Vec<serde_json::Value>;
    async fn tasks_snapshot(&self) -> Vec<serde_json::Value>;
    async fn files_snapshot(&self) -> Vec<serde_json::Value>;
    async fn collaborations_snapshot(&self) -> Vec<serde_json::Value>;
}

struct HeartbeatState {
    last_seen: DateTime<Utc>,
    disconnected: bool,
}

pub struct RealtimeSync {
    transport: Arc<dyn SyncTransport>,
    subscriber: Arc<dyn EventSubscriber>,
    snapshot: Arc<dyn SnapshotSource>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    sender: mpsc::UnboundedSender<serde_json::Value>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<serde_json::Value>>>,
    heartbeats: Mutex<HashMap<AgentId, HeartbeatState>>,
    drain_handle: Mutex<Option<JoinHandle<()>>>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeSync {
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        subscriber: Arc<dyn EventSubscriber>,
        snapshot: Arc<dyn SnapshotSource>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            transport,
            subscriber,
            snapshot,
            events,
            clock,
            config,
            sender,
            receiver: Mutex::new(Some(receiver)),
            heartbeats: Mutex::new(HashMap::new()),
            drain_handle: Mutex::new(None),
            heartbeat_handle: Mutex::new(None),
        })
    }

    /// Subscribes to the mirrored event set and starts the queue drainer
    /// and heartbeat checker loops.
    pub async fn start(self: &Arc<Self>) {
        let handler: Arc<dyn EventHandler> = self.clone();
        for event_type in MIRRORED_EVENT_TYPES {
            self.subscriber
                .subscribe(event_type, SYNC_SUBSCRIBER_ID.to_string(), handler.clone())
                .await;
        }

        let receiver = self.receiver.lock().await.take();
        if let Some(mut receiver) = receiver {
            let sync = Arc::clone(self);
            let handle = tokio::spawn(async move {
                while let Some(event) = receiver.recv().await {
                    if let Err(e) = sync.transport.broadcast_sync(MessageContent::SyncEvent { event }).await {
                        warn!("Failed to broadcast sync event: {}", e);
                    }
                }
            });
            *self.drain_handle.lock().await = Some(handle);
        }

        let sync = Arc::clone(self);
        let interval = self.config.heartbeat_check_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                sync.check_heartbeats().await;
            }
        });
        *self.heartbeat_handle.lock().await = Some(handle);

        info!("Realtime sync started");
    }

    pub async fn shutdown(&self) {
        for event_type in MIRRORED_EVENT_TYPES {
            self.subscriber.unsubscribe(event_type, &SYNC_SUBSCRIBER_ID.to_string()).await;
        }
        if let Some(handle) = self.drain_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.heartbeat_handle.lock().await.take() {
            handle.abort();
        }
        info!("Realtime sync shut down");
    }

    /// Registers an agent for heartbeat tracking; called when the
    /// Coordination Manager creates an agent.
    pub async fn register_agent(&self, agent_id: AgentId) {
        self.heartbeats.lock().await.insert(
            agent_id,
            HeartbeatState { last_seen: self.clock.now(), disconnected: false },
        );
    }

    pub async fn unregister_agent(&self, agent_id: &AgentId) {
        self.heartbeats.lock().await.remove(agent_id);
    }

    /// Refreshes an agent's last-seen timestamp, clearing any prior
    /// disconnected mark.
    pub async fn heartbeat(&self, agent_id: &AgentId) {
        if let Some(state) = self.heartbeats.lock().await.get_mut(agent_id) {
            state.last_seen = self.clock.now();
            state.disconnected = false;
        }
    }

    async fn check_heartbeats(&self) {
        let stale_window = chrono::Duration::from_std(self.config.heartbeat_check_interval)
            .unwrap_or(chrono::Duration::seconds(10))
            * self.config.max_missed_heartbeats as i32;
        let now = self.clock.now();

        let newly_disconnected: Vec<AgentId> = {
            let mut heartbeats = self.heartbeats.lock().await;
            heartbeats
                .iter_mut()
                .filter(|(_, state)| !state.disconnected && now.signed_duration_since(state.last_seen) > stale_window)
                .map(|(id, state)| {
                    state.disconnected = true;
                    id.clone()
                })
                .collect()
        };

        for agent_id in newly_disconnected {
            warn!("agent {} missed {} sync heartbeats, marking disconnected", agent_id, self.config.max_missed_heartbeats);
            let mut payload = HashMap::new();
            payload.insert("status".to_string(), json!("disconnected"));
            self.events.emit(events::AGENT_STATUS_CHANGED, payload.clone(), Some(agent_id.clone())).await;
            self.sender
                .send(json!({
                    "event_type": events::AGENT_STATUS_CHANGED,
                    "payload": payload,
                    "source": agent_id,
                }))
                .ok();
        }
    }

    /// Produces a full-state snapshot for one agent, sent as a single
    /// `full-sync` message.
    pub async fn force_sync(&self, agent_id: AgentId) -> Result<()> {
        let data = json!({
            "agents": self.snapshot.agents_snapshot().await,
            "tasks": self.snapshot.tasks_snapshot().await,
            "files": self.snapshot.files_snapshot().await,
            "collaborations": self.snapshot.collaborations_snapshot().await,
        });
        self.transport.send_sync(agent_id, MessageContent::FullSync { data }).await
    }
}

#[async_trait]
impl EventHandler for RealtimeSync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let value = json!({
            "event_type": event.event_type,
            "payload": event.payload,
            "source": event.source,
            "timestamp": event.timestamp,
        });
        self.sender.send(value).ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Message, MessageBus, MessageHandler};
    use crate::capabilities::{SystemClock, UuidGenerator};
    use crate::config::BusConfig;
    use std::sync::Mutex as StdMutex;

    struct RecordingHandler(Arc<StdMutex<Vec<Message>>>);

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn on_message(&self, message: Message) {
            self.0.lock().unwrap().push(message);
        }
    }

    struct EmptySnapshot;
    #[async_trait]
    impl SnapshotSource for EmptySnapshot {
        async fn agents_snapshot(&self) -> Vec<serde_json::Value> {
            vec![]
        }
        async fn tasks_snapshot(&self) -> Vec<serde_json::Value> {
            vec![]
        }
        async fn files_snapshot(&self) -> Vec<serde_json::Value> {
            vec![]
        }
        async fn collaborations_snapshot(&self) -> Vec<serde_json::Value> {
            vec![]
        }
    }

    fn bus() -> Arc<MessageBus> {
        Arc::new(MessageBus::new(
            BusConfig { queue_size: 50, retry_attempts: 3, message_timeout: std::time::Duration::from_secs(5), sweep_interval: std::time::Duration::from_secs(5) },
            std::time::Duration::from_secs(90),
            Arc::new(UuidGenerator),
        ))
    }

    fn sync_config() -> SyncConfig {
        SyncConfig { heartbeat_check_interval: std::time::Duration::from_millis(20), max_missed_heartbeats: 2 }
    }

    #[tokio::test]
    async fn force_sync_sends_a_full_sync_message() {
        let bus = bus();
        let received = Arc::new(StdMutex::new(Vec::new()));
        bus.connect("observer".to_string(), Arc::new(RecordingHandler(received.clone()))).await;

        let sync = RealtimeSync::new(bus.clone(), bus.clone(), Arc::new(EmptySnapshot), bus.clone(), Arc::new(SystemClock), sync_config());
        sync.force_sync("observer".to_string()).await.unwrap();

        let messages = received.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0].content, crate::bus::MessageContent::FullSync { .. }));
    }

    #[tokio::test]
    async fn mirrored_event_is_rebroadcast_as_a_sync_event() {
        let bus = bus();
        let received = Arc::new(StdMutex::new(Vec::new()));
        bus.connect("observer".to_string(), Arc::new(RecordingHandler(received.clone()))).await;

        let sync = RealtimeSync::new(bus.clone(), bus.clone(), Arc::new(EmptySnapshot), bus.clone(), Arc::new(SystemClock), sync_config());
        sync.start().await;

        bus.publish(events::TASK_CREATED, HashMap::new(), None).await.unwrap();

        for _ in 0..50 {
            if received.lock().unwrap().iter().any(|m| matches!(m.content, crate::bus::MessageContent::SyncEvent { .. })) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        assert!(received.lock().unwrap().iter().any(|m| matches!(m.content, crate::bus::MessageContent::SyncEvent { .. })));
    }

    #[tokio::test]
    async fn agent_missing_heartbeats_is_marked_disconnected() {
        let bus = bus();
        let sync = RealtimeSync::new(bus.clone(), bus.clone(), Arc::new(EmptySnapshot), bus.clone(), Arc::new(SystemClock), sync_config());
        sync.register_agent("a1".to_string()).await;
        sync.start().await;

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let heartbeats = sync.heartbeats.lock().await;
        assert!(heartbeats.get("a1").unwrap().disconnected);
    }
}
