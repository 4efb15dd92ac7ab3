use super::message::Message;
use crate::models::AgentId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Per-agent offline queue, bounded at `capacity`. On overflow the oldest
/// message is dropped (§4.A: "bounded at 1,000; on overflow the oldest
/// message is dropped").
#[derive(Clone)]
pub struct OfflineQueues {
    queues: Arc<Mutex<HashMap<AgentId, VecDeque<Message>>>>,
    capacity: usize,
}

impl OfflineQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    pub async fn enqueue(&self, agent: &AgentId, message: Message) {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(agent.clone()).or_default();
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    "Offline queue for {} full, dropped message {}",
                    agent, dropped.id
                );
            }
        }
        queue.push_back(message);
    }

    pub async fn drain(&self, agent: &AgentId) -> Vec<Message> {
        let mut queues = self.queues.lock().await;
        queues
            .remove(agent)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    pub async fn size(&self, agent: &AgentId) -> usize {
        let queues = self.queues.lock().await;
        queues.get(agent).map(VecDeque::len).unwrap_or(0)
    }

    pub async fn agents_with_queued(&self) -> Vec<AgentId> {
        let queues = self.queues.lock().await;
        queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::message::{MessageContent, MessageType, Recipient};
    use chrono::Utc;

    fn msg(id: &str) -> Message {
        Message {
            id: id.to_string(),
            sender: "a".to_string(),
            recipient: Recipient::Direct("b".to_string()),
            message_type: MessageType::Notification,
            content: MessageContent::Notification {
                text: "hi".to_string(),
            },
            timestamp: Utc::now(),
            requires_response: false,
            correlation_id: None,
            is_notification: true,
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let queues = OfflineQueues::new(2);
        queues.enqueue(&"b".to_string(), msg("1")).await;
        queues.enqueue(&"b".to_string(), msg("2")).await;
        queues.enqueue(&"b".to_string(), msg("3")).await;

        let drained = queues.drain(&"b".to_string()).await;
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, "2");
        assert_eq!(drained[1].id, "3");
    }
}
