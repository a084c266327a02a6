//! # switchboard-core
//!
//! Vendor-neutral realtime pub/sub for Switchboard.
//!
//! Application code talks to one [`Switchboard`] facade. The facade binds a
//! single [`Provider`] backend and wraps selected operations in a
//! [`MiddlewareChain`]:
//!
//! - **Provider** - Connection lifecycle, channel factory and backend events
//! - **Channel** - Named pub/sub endpoint with wildcard handlers and history
//! - **Presence** - Membership tracking on presence-enabled channels
//! - **Middleware** - `pre` / `post` / `error` interception of operations
//! - **Dispatcher** - Deferred, serial, panic-isolated handler delivery for backends
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Application │────▶│ Switchboard │────▶│  Provider   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │ Middleware  │     │  Channel    │──▶ Presence
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use switchboard_core::{Switchboard, SwitchboardConfig, TracingMiddleware};
//!
//! let mut switchboard = Switchboard::create(
//!     SwitchboardConfig::new(provider).with_middleware(Arc::new(TracingMiddleware)),
//! )?;
//! switchboard.connect(None).await?;
//! switchboard.publish("room", "ping", json!({"n": 1})).await?;
//! ```

pub mod capabilities;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod facade;
pub mod listeners;
pub mod message;
pub mod metrics;
pub mod middleware;
pub mod options;
pub mod presence;
pub mod provider;

pub use capabilities::{AuthenticationModes, Capabilities, Feature};
pub use channel::{
    same_channel, validate_channel_name, Channel, ChannelState, HistoryOptions, MessageHandler,
    Subscription, SubscriptionId, WILDCARD,
};
pub use dispatch::Dispatcher;
pub use error::{ErrorCode, Result, SwitchboardError};
pub use facade::{DisconnectPolicy, Switchboard, SwitchboardConfig};
pub use listeners::{ListenerId, Registry};
pub use message::{Message, MessageMetadata, PublishOptions};
pub use middleware::{
    AuthTokenMiddleware, MetricsMiddleware, Middleware, MiddlewareChain, MiddlewareContext,
    MiddlewareId, Operation, TracingMiddleware,
};
pub use options::{
    AuthMethod, AuthOptions, ChannelAuth, ChannelOptions, ConnectionOptions, ProviderOptions,
};
pub use presence::{Presence, PresenceEvent, PresenceHandler, PresenceMember, PresenceStatus};
pub use provider::{ConnectionState, EventHandler, Provider, ProviderEvent};
