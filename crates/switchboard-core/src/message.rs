//! Message types delivered to channel subscribers.
//!
//! Messages are immutable once created; backends assign the id and timestamp.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = String;

/// Atomic counter for ensuring unique IDs even within the same millisecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("msg-{}-{}", now_millis(), counter)
}

/// Metadata attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Sender client ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Sender user ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Payload encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Whether the message was replayed from history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replayed: Option<bool>,
    /// Connection that sent the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Custom metadata fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A message published on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Channel the message was published on.
    pub channel: String,
    /// Event name.
    pub event: String,
    /// Opaque payload.
    pub data: Value,
    /// Creation time in milliseconds.
    pub timestamp: u64,
    /// Optional metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    /// Create a new message with a fresh id and timestamp.
    #[must_use]
    pub fn new(channel: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Self {
            id: generate_message_id(),
            channel: channel.into(),
            event: event.into(),
            data,
            timestamp: now_millis(),
            metadata: None,
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Options for publishing a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Require acknowledgment from the backend.
    #[serde(default)]
    pub ack: bool,
    /// Publish timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Metadata to attach to the message.
    #[serde(default)]
    pub metadata: Option<MessageMetadata>,
    /// Ask the backend to retain the message.
    #[serde(default)]
    pub retained: bool,
}
