//! Provider capability contract.
//!
//! Every backend implements [`Provider`]. The facade only ever talks to a
//! backend through this trait, so concrete backends are interchangeable.

use crate::capabilities::Capabilities;
use crate::channel::Channel;
use crate::error::Result;
use crate::listeners::ListenerId;
use crate::options::{ChannelOptions, ConnectionOptions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Connection lifecycle of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    /// Temporary failure; the backend may recover.
    Suspended,
    /// Permanent failure.
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Initialized => "initialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Suspended => "suspended",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-level events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderEvent {
    Connected,
    Disconnected,
    Reconnecting,
    Error,
    Suspended,
    StateChange,
}

impl ProviderEvent {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderEvent::Connected => "connected",
            ProviderEvent::Disconnected => "disconnected",
            ProviderEvent::Reconnecting => "reconnecting",
            ProviderEvent::Error => "error",
            ProviderEvent::Suspended => "suspended",
            ProviderEvent::StateChange => "state_change",
        }
    }
}

impl fmt::Display for ProviderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler for backend-level events. `state_change` events carry `{"state": ...}`.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// The contract every backend satisfies.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend name, used in `not-supported` errors.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Connect to the backend.
    async fn connect(&self, options: Option<ConnectionOptions>) -> Result<()>;

    /// Disconnect from the backend.
    async fn disconnect(&self) -> Result<()>;

    /// Get or create a channel. Repeated calls with the same name return the
    /// same channel object.
    fn channel(&self, name: &str, options: ChannelOptions) -> Result<Arc<dyn Channel>>;

    fn connection_state(&self) -> ConnectionState;

    /// Register a handler for a backend event.
    fn on(&self, event: ProviderEvent, handler: EventHandler) -> ListenerId;

    /// Remove a handler registered with [`Provider::on`].
    fn off(&self, event: ProviderEvent, id: ListenerId) -> bool;

    fn capabilities(&self) -> Capabilities;

    /// Release backend resources. Calling it more than once is allowed.
    async fn destroy(&self) -> Result<()>;
}
