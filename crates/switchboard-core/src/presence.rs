//! Presence tracking for Switchboard.
//!
//! Presence layers membership tracking on a channel created with
//! `presence: true`. Each presence instance holds at most one local "self"
//! member.

use crate::error::Result;
use crate::listeners::ListenerId;
use crate::message::now_millis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Member availability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Away,
    Offline,
}

/// Presence event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceEvent {
    Enter,
    Leave,
    Update,
    /// Full membership resynchronized.
    Sync,
}

impl fmt::Display for PresenceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PresenceEvent::Enter => "enter",
            PresenceEvent::Leave => "leave",
            PresenceEvent::Update => "update",
            PresenceEvent::Sync => "sync",
        };
        f.write_str(s)
    }
}

/// A member of a channel's presence set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMember {
    /// Backend-assigned member id.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Member data.
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub status: PresenceStatus,
    /// Last activity in milliseconds.
    pub last_seen: u64,
}

impl PresenceMember {
    /// Create an online member.
    #[must_use]
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            client_id: None,
            user_id: None,
            connection_id: None,
            data,
            status: PresenceStatus::Online,
            last_seen: now_millis(),
        }
    }

    /// Shallow-merge `data` into the member's data and refresh `last_seen`.
    pub fn merge_data(&mut self, data: Map<String, Value>) {
        self.data.extend(data);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_seen = now_millis();
    }
}

/// Handler for presence events.
pub type PresenceHandler = Arc<dyn Fn(PresenceEvent, &PresenceMember) + Send + Sync>;

/// The presence contract.
#[async_trait]
pub trait Presence: Send + Sync {
    /// Receive every presence event.
    fn subscribe(&self, handler: PresenceHandler) -> ListenerId;

    /// Receive only events of one kind.
    fn subscribe_to(&self, event: PresenceEvent, handler: PresenceHandler) -> ListenerId;

    /// Remove one handler, or every handler when `id` is `None`.
    fn unsubscribe(&self, id: Option<ListenerId>);

    /// Current members.
    async fn get(&self) -> Result<Vec<PresenceMember>>;

    /// Enter the presence set as the local member.
    async fn enter(&self, data: Option<Map<String, Value>>) -> Result<()>;

    /// Leave the presence set. Does nothing before `enter`.
    async fn leave(&self) -> Result<()>;

    /// Merge data into the local member. Does nothing before `enter`.
    async fn update(&self, data: Map<String, Value>) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}
