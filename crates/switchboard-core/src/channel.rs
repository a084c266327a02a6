//! Channel abstraction for Switchboard.
//!
//! Channels are named pub/sub endpoints owned by the backend that created
//! them. Handlers bind to an event name or to the `*` wildcard.

use crate::error::{Result, SwitchboardError};
use crate::listeners::ListenerId;
use crate::message::{Message, PublishOptions};
use crate::options::ChannelOptions;
use crate::presence::Presence;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// Event name that matches every event on a channel.
pub const WILDCARD: &str = "*";

/// Validate a channel name.
///
/// # Errors
///
/// Returns an `invalid-config` error if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "Channel name cannot be empty"
    } else if name.len() > MAX_CHANNEL_NAME_LENGTH {
        "Channel name too long"
    } else if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        "Channel name contains invalid characters"
    } else {
        return Ok(());
    };
    Err(SwitchboardError::invalid_config(reason).with_detail("channel", name))
}

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Initialized,
    Subscribing,
    Subscribed,
    Unsubscribing,
    Unsubscribed,
    Failed,
}

impl ChannelState {
    /// `Unsubscribed` and `Failed` end the lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Unsubscribed | ChannelState::Failed)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Initialized => "initialized",
            ChannelState::Subscribing => "subscribing",
            ChannelState::Subscribed => "subscribed",
            ChannelState::Unsubscribing => "unsubscribing",
            ChannelState::Unsubscribed => "unsubscribed",
            ChannelState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Handler for channel messages.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Identifier of a channel subscription.
pub type SubscriptionId = ListenerId;

type Canceller = Box<dyn FnOnce() + Send>;

/// Handle for a registered channel handler.
pub struct Subscription {
    id: SubscriptionId,
    event: String,
    cancel: Mutex<Option<Canceller>>,
}

impl Subscription {
    /// Create a subscription whose `unsubscribe` runs `cancel` once.
    pub fn new(
        id: SubscriptionId,
        event: impl Into<String>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id,
            event: event.into(),
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Event the handler is bound to (`*` for every event).
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the handler. Later calls do nothing.
    pub fn unsubscribe(&self) {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cancel) = cancel {
            cancel();
            debug!(subscription = %self.id, event = %self.event, "Unsubscribed");
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event", &self.event)
            .finish()
    }
}

/// History query options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryOptions {
    /// Keep only the most recent `limit` messages.
    pub limit: Option<usize>,
    /// Earliest timestamp (inclusive, milliseconds).
    pub start: Option<u64>,
    /// Latest timestamp (inclusive, milliseconds).
    pub end: Option<u64>,
    /// Newest first.
    pub reverse: bool,
    /// Only messages after this message id.
    pub after: Option<String>,
    /// Only messages before this message id.
    pub before: Option<String>,
}

impl HistoryOptions {
    /// Apply the query to a chronologically ordered message log.
    #[must_use]
    pub fn apply(&self, log: &[Message]) -> Vec<Message> {
        let mut from = 0;
        let mut to = log.len();
        if let Some(after) = &self.after {
            if let Some(pos) = log.iter().position(|m| &m.id == after) {
                from = pos + 1;
            }
        }
        if let Some(before) = &self.before {
            if let Some(pos) = log.iter().position(|m| &m.id == before) {
                to = pos;
            }
        }

        let mut result: Vec<Message> = log
            .get(from..to.max(from))
            .unwrap_or_default()
            .iter()
            .filter(|m| self.start.map_or(true, |s| m.timestamp >= s))
            .filter(|m| self.end.map_or(true, |e| m.timestamp <= e))
            .cloned()
            .collect();

        if let Some(limit) = self.limit {
            let skip = result.len().saturating_sub(limit);
            result.drain(..skip);
        }
        if self.reverse {
            result.reverse();
        }
        result
    }
}

/// The channel contract.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> ChannelState;

    /// Options the channel was created with.
    fn options(&self) -> &ChannelOptions;

    /// Bind a handler to `event`, or to every event when `event` is `*`.
    async fn subscribe(&self, event: &str, handler: MessageHandler) -> Result<Subscription>;

    /// Bind a handler to every event on the channel.
    async fn subscribe_all(&self, handler: MessageHandler) -> Result<Subscription> {
        self.subscribe(WILDCARD, handler).await
    }

    /// Publish with explicit options. Delivery to handlers is deferred.
    async fn publish_with(&self, event: &str, data: Value, options: PublishOptions)
        -> Result<()>;

    async fn publish(&self, event: &str, data: Value) -> Result<()> {
        self.publish_with(event, data, PublishOptions::default())
            .await
    }

    /// Presence for this channel.
    ///
    /// # Errors
    ///
    /// Fails with `not-supported` when the channel or backend lacks presence.
    fn presence(&self) -> Result<Arc<dyn Presence>>;

    /// Message history.
    ///
    /// # Errors
    ///
    /// Fails with `not-supported` when the backend lacks history.
    async fn history(&self, options: HistoryOptions) -> Result<Vec<Message>>;

    /// Leave the channel: state becomes `Unsubscribed` and handlers are cleared.
    async fn leave(&self) -> Result<()>;

    /// Bind several handlers at once.
    async fn bind(&self, handlers: Vec<(String, MessageHandler)>) -> Result<Vec<Subscription>> {
        let mut subscriptions = Vec::with_capacity(handlers.len());
        for (event, handler) in handlers {
            subscriptions.push(self.subscribe(&event, handler).await?);
        }
        Ok(subscriptions)
    }

    /// Unbind handlers.
    ///
    /// With neither argument every handler is removed; with only `event`, all
    /// handlers for that event; with `subscription`, just that registration.
    fn unbind(&self, event: Option<&str>, subscription: Option<SubscriptionId>);
}

/// Whether two channel handles point at the same channel object.
#[must_use]
pub fn same_channel(a: &Arc<dyn Channel>, b: &Arc<dyn Channel>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
