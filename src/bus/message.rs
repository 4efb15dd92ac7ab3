use crate::models::{AgentId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who a message is addressed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Recipient {
    Direct(AgentId),
    Broadcast(Vec<AgentId>),
}

impl Recipient {
    pub fn agents(&self) -> Vec<AgentId> {
        match self {
            Recipient::Direct(id) => vec![id.clone()],
            Recipient::Broadcast(ids) => ids.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Event,
    System,
    Info,
}

/// Tagged payload union. Design notes: "model [any payloads] as a tagged
/// union keyed by a small enum ... with opaque carrying a type string +
/// serialized bytes" rather than an untyped blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MessageContent {
    SyncEvent {
        event: serde_json::Value,
    },
    FullSync {
        data: serde_json::Value,
    },
    Notification {
        text: String,
    },
    DomainEvent {
        event_type: String,
        payload: serde_json::Value,
    },
    Opaque {
        type_tag: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: AgentId,
    pub recipient: Recipient,
    pub message_type: MessageType,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    pub requires_response: bool,
    pub correlation_id: Option<String>,
    /// §4.A: "Notifications are messages with a `is-notification` content
    /// flag and per-agent tracking of read state."
    pub is_notification: bool,
}

impl Message {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("message id is required".to_string());
        }
        if self.sender.is_empty() {
            return Err("sender is required".to_string());
        }
        match &self.recipient {
            Recipient::Direct(id) if id.is_empty() => {
                return Err("recipient is required".to_string())
            }
            Recipient::Broadcast(ids) if ids.is_empty() => {
                return Err("broadcast recipient set is empty".to_string())
            }
            _ => {}
        }
        Ok(())
    }

    /// Text representation used for `search`.
    pub fn searchable_text(&self) -> String {
        match &self.content {
            MessageContent::Notification { text } => text.clone(),
            MessageContent::DomainEvent { event_type, .. } => event_type.clone(),
            MessageContent::SyncEvent { event } => event.to_string(),
            MessageContent::FullSync { data } => data.to_string(),
            MessageContent::Opaque { type_tag, .. } => type_tag.clone(),
        }
    }
}

/// Input for publishing a pub/sub event; distinct from a delivered
/// `Message` because it has no single recipient until subscribers are
/// resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub payload: HashMap<String, serde_json::Value>,
    pub source: Option<AgentId>,
    pub timestamp: DateTime<Utc>,
}
