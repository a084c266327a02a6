//! The application-facing facade.
//!
//! A [`Switchboard`] owns exactly one active backend, the channel cache and
//! the middleware chain. Precondition failures (no backend bound, already
//! initialized) are returned before the chain runs, so they never reach
//! `error` hooks.

use crate::capabilities::Capabilities;
use crate::channel::{Channel, MessageHandler, Subscription};
use crate::error::{ErrorCode, Result, SwitchboardError};
use crate::listeners::ListenerId;
use crate::metrics;
use crate::middleware::{
    Middleware, MiddlewareChain, MiddlewareContext, MiddlewareId, Operation, EVENT_KEY,
    PAYLOAD_KEY,
};
use crate::options::{ChannelOptions, ConnectionOptions, ProviderOptions};
use crate::provider::{ConnectionState, EventHandler, Provider, ProviderEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `disconnect` does when a cached channel fails to leave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Channels leave one by one in name order; the first failure aborts the
    /// remaining leaves and the backend stays connected.
    #[default]
    AbortOnFirstError,
    /// Every channel is asked to leave and the backend is disconnected; leave
    /// failures are then reported together as one `channel-error`.
    LeaveAll,
}

/// Facade configuration.
pub struct SwitchboardConfig {
    /// Backend to bind.
    pub provider: Arc<dyn Provider>,
    /// Middleware registered at initialization, in order.
    pub middleware: Vec<Arc<dyn Middleware>>,
    /// Defaults merged under options passed to [`Switchboard::channel`].
    pub channel_defaults: ChannelOptions,
    /// Defaults merged under options passed to [`Switchboard::connect`].
    pub connection: ConnectionOptions,
    pub provider_options: ProviderOptions,
    pub disconnect_policy: DisconnectPolicy,
}

impl SwitchboardConfig {
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            middleware: Vec::new(),
            channel_defaults: ChannelOptions::default(),
            connection: ConnectionOptions::default(),
            provider_options: ProviderOptions::default(),
            disconnect_policy: DisconnectPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    #[must_use]
    pub fn with_channel_defaults(mut self, defaults: ChannelOptions) -> Self {
        self.channel_defaults = defaults;
        self
    }

    #[must_use]
    pub fn with_connection_defaults(mut self, defaults: ConnectionOptions) -> Self {
        self.connection = defaults;
        self
    }

    #[must_use]
    pub fn with_provider_options(mut self, options: ProviderOptions) -> Self {
        self.provider_options = options;
        self
    }

    #[must_use]
    pub fn with_disconnect_policy(mut self, policy: DisconnectPolicy) -> Self {
        self.disconnect_policy = policy;
        self
    }
}

/// Single entry point over a pluggable realtime backend.
#[derive(Default)]
pub struct Switchboard {
    provider: Option<Arc<dyn Provider>>,
    chain: MiddlewareChain,
    channels: HashMap<String, Arc<dyn Channel>>,
    channel_defaults: ChannelOptions,
    connection_defaults: ConnectionOptions,
    provider_options: ProviderOptions,
    disconnect_policy: DisconnectPolicy,
    initialized: bool,
}

impl Switchboard {
    /// Create an uninitialized facade.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and initialize a facade in one step.
    ///
    /// # Errors
    ///
    /// Never fails for a fresh instance; see [`Switchboard::initialize`].
    pub fn create(config: SwitchboardConfig) -> Result<Self> {
        let mut switchboard = Self::new();
        switchboard.initialize(config)?;
        Ok(switchboard)
    }

    /// Bind a backend and register the configured middleware.
    ///
    /// # Errors
    ///
    /// Returns `invalid-state` if the facade is already initialized.
    pub fn initialize(&mut self, config: SwitchboardConfig) -> Result<()> {
        if self.initialized {
            return Err(SwitchboardError::invalid_state(
                "Switchboard is already initialized",
            ));
        }

        info!(
            provider = config.provider.name(),
            version = config.provider.version(),
            middleware = config.middleware.len(),
            "Initializing switchboard"
        );

        for middleware in config.middleware {
            self.chain.use_middleware(middleware);
        }
        self.provider = Some(config.provider);
        self.channel_defaults = config.channel_defaults;
        self.connection_defaults = config.connection;
        self.provider_options = config.provider_options;
        self.disconnect_policy = config.disconnect_policy;
        self.initialized = true;
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn bound(&self) -> Result<Arc<dyn Provider>> {
        self.provider
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(SwitchboardError::provider_not_initialized)
    }

    /// Connect the bound backend.
    ///
    /// `options` are merged over the configured connection defaults and
    /// placed in the context data bag, where `pre` hooks may rewrite them.
    ///
    /// # Errors
    ///
    /// Returns `provider-not-initialized` without a backend, otherwise any
    /// error raised by a hook or by the backend.
    pub async fn connect(&self, options: Option<ConnectionOptions>) -> Result<()> {
        let provider = self.bound()?;
        let options = match options {
            Some(options) => Some(options.merged_over(&self.connection_defaults)),
            None if self.connection_defaults.is_empty() => None,
            None => Some(self.connection_defaults.clone()),
        };

        let mut context = MiddlewareContext::new(Arc::clone(&provider), Operation::Connect);
        if let Some(options) = &options {
            context.set_connection_options(options)?;
        }

        self.chain
            .execute(context, |ctx| async move {
                let options = ctx.connection_options()?;
                provider.connect(options).await
            })
            .await
    }

    /// Leave every cached channel, clear the cache, then disconnect the backend.
    ///
    /// # Errors
    ///
    /// Returns `provider-not-initialized` without a backend. Channel leave
    /// failures are handled according to the configured [`DisconnectPolicy`].
    pub async fn disconnect(&mut self) -> Result<()> {
        let provider = self.bound()?;
        let context = MiddlewareContext::new(Arc::clone(&provider), Operation::Disconnect);
        let policy = self.disconnect_policy;
        let channels = &mut self.channels;

        self.chain
            .execute(context, move |_| async move {
                let failures = leave_channels(channels, policy).await?;
                provider.disconnect().await?;

                if failures.is_empty() {
                    return Ok(());
                }
                let names: Vec<Value> = failures
                    .iter()
                    .map(|(name, _)| Value::from(name.as_str()))
                    .collect();
                let mut err = SwitchboardError::channel(format!(
                    "{} channel(s) failed to leave during disconnect",
                    failures.len()
                ))
                .with_detail("channels", names);
                if let Some((_, first)) = failures.into_iter().next() {
                    err = err.with_cause(first);
                }
                Err(err)
            })
            .await
    }

    /// Get the cached channel called `name`, or create it.
    ///
    /// A cached channel is returned as is and `options` are ignored.
    /// Otherwise `options` are merged over the channel defaults.
    ///
    /// # Errors
    ///
    /// Returns `provider-not-initialized` without a backend, or the
    /// backend's error if it cannot create the channel.
    pub fn channel(
        &mut self,
        name: &str,
        options: Option<ChannelOptions>,
    ) -> Result<Arc<dyn Channel>> {
        let provider = self.bound()?;
        if let Some(existing) = self.channels.get(name) {
            return Ok(Arc::clone(existing));
        }

        let options = options
            .unwrap_or_default()
            .merged_over(&self.channel_defaults);
        let channel = provider.channel(name, options)?;
        self.channels.insert(name.to_string(), Arc::clone(&channel));
        metrics::set_active_channels(self.channels.len());
        debug!(channel = %name, cached = self.channels.len(), "Channel cached");
        Ok(channel)
    }

    /// The cached channel called `name`, without creating one.
    #[must_use]
    pub fn cached_channel(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).map(Arc::clone)
    }

    /// Names of all cached channels, sorted.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Connection state of the bound backend, `Disconnected` if none is bound.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.provider
            .as_ref()
            .map_or(ConnectionState::Disconnected, |p| p.connection_state())
    }

    /// Register a backend event handler.
    ///
    /// # Errors
    ///
    /// Returns `provider-not-initialized` without a backend.
    pub fn on(&self, event: ProviderEvent, handler: EventHandler) -> Result<ListenerId> {
        Ok(self.bound()?.on(event, handler))
    }

    /// Remove a backend event handler.
    ///
    /// # Errors
    ///
    /// Returns `provider-not-initialized` without a backend.
    pub fn off(&self, event: ProviderEvent, id: ListenerId) -> Result<bool> {
        Ok(self.bound()?.off(event, id))
    }

    /// Capabilities of the bound backend.
    ///
    /// # Errors
    ///
    /// Returns `provider-not-initialized` without a backend.
    pub fn capabilities(&self) -> Result<Capabilities> {
        Ok(self.bound()?.capabilities())
    }

    #[must_use]
    pub fn provider(&self) -> Option<Arc<dyn Provider>> {
        self.provider.as_ref().map(Arc::clone)
    }

    #[must_use]
    pub fn provider_options(&self) -> &ProviderOptions {
        &self.provider_options
    }

    /// Replace the backend. A connected backend is fully disconnected first;
    /// the channel cache is always cleared since channels do not move
    /// between backends.
    ///
    /// # Errors
    ///
    /// Returns the error of the disconnect, in which case nothing is swapped.
    pub async fn switch_provider(&mut self, provider: Arc<dyn Provider>) -> Result<()> {
        if self.connection_state() == ConnectionState::Connected {
            self.disconnect().await?;
        }

        info!(
            from = self.provider.as_ref().map_or("-", |p| p.name()),
            to = provider.name(),
            "Switching provider"
        );
        self.provider = Some(provider);
        self.channels.clear();
        metrics::set_active_channels(0);
        Ok(())
    }

    /// Tear everything down. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns the error of the disconnect or of the backend's own teardown.
    pub async fn destroy(&mut self) -> Result<()> {
        if let Some(provider) = self.provider.as_ref().map(Arc::clone) {
            self.disconnect().await?;
            provider.destroy().await?;
            self.provider = None;
            info!(provider = provider.name(), "Switchboard destroyed");
        }
        self.channels.clear();
        self.initialized = false;
        Ok(())
    }

    /// Append a middleware.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> MiddlewareId {
        self.chain.use_middleware(middleware)
    }

    /// Remove a middleware registration.
    pub fn remove_middleware(&mut self, id: MiddlewareId) -> bool {
        self.chain.remove(id)
    }

    /// Publish through the middleware chain.
    ///
    /// Event name and payload travel in the context data bag under
    /// [`EVENT_KEY`] and [`PAYLOAD_KEY`], so `pre` hooks may rewrite them.
    ///
    /// # Errors
    ///
    /// Returns precondition errors before the chain runs, otherwise any hook
    /// or backend error.
    pub async fn publish(&mut self, channel: &str, event: &str, data: Value) -> Result<()> {
        let provider = self.bound()?;
        let channel = self.channel(channel, None)?;
        let context = MiddlewareContext::new(provider, Operation::Publish)
            .with_channel(Arc::clone(&channel))
            .with_data(EVENT_KEY, Value::from(event))
            .with_data(PAYLOAD_KEY, data);

        self.chain
            .execute(context, |ctx| async move {
                let event = context_event(&ctx)?;
                let data = ctx.data.get(PAYLOAD_KEY).cloned().unwrap_or(Value::Null);
                channel.publish(&event, data).await?;
                metrics::record_publish(channel.name());
                Ok(())
            })
            .await
    }

    /// Subscribe a handler through the middleware chain.
    ///
    /// # Errors
    ///
    /// Returns precondition errors before the chain runs, otherwise any hook
    /// or backend error.
    pub async fn subscribe(
        &mut self,
        channel: &str,
        event: &str,
        handler: MessageHandler,
    ) -> Result<Subscription> {
        let provider = self.bound()?;
        let channel = self.channel(channel, None)?;
        let context = MiddlewareContext::new(provider, Operation::Subscribe)
            .with_channel(Arc::clone(&channel))
            .with_data(EVENT_KEY, Value::from(event));

        self.chain
            .execute(context, |ctx| async move {
                let event = context_event(&ctx)?;
                channel.subscribe(&event, handler).await
            })
            .await
    }

    /// Leave one cached channel through the middleware chain and drop it
    /// from the cache.
    ///
    /// # Errors
    ///
    /// Returns `channel-not-found` if the channel is not cached.
    pub async fn leave_channel(&mut self, name: &str) -> Result<()> {
        let provider = self.bound()?;
        let channel = self.cached_channel(name).ok_or_else(|| {
            SwitchboardError::new(
                ErrorCode::ChannelNotFound,
                format!("Channel \"{name}\" is not open"),
            )
        })?;
        let context =
            MiddlewareContext::new(provider, Operation::Unsubscribe).with_channel(Arc::clone(&channel));

        self.chain
            .execute(context, |_| async move { channel.leave().await })
            .await?;
        self.channels.remove(name);
        metrics::set_active_channels(self.channels.len());
        Ok(())
    }

    /// Enter presence on a channel through the middleware chain.
    ///
    /// # Errors
    ///
    /// Returns `not-supported` before the chain runs when the channel has no
    /// presence, otherwise any hook or backend error.
    pub async fn enter_presence(
        &mut self,
        channel: &str,
        data: Option<Map<String, Value>>,
    ) -> Result<()> {
        let provider = self.bound()?;
        let channel = self.channel(channel, None)?;
        let presence = channel.presence()?;
        let context = MiddlewareContext::new(provider, Operation::PresenceEnter)
            .with_channel(channel)
            .with_data(PAYLOAD_KEY, data.map_or(Value::Null, Value::Object));

        self.chain
            .execute(context, |ctx| async move {
                let data = match ctx.data.get(PAYLOAD_KEY) {
                    Some(Value::Object(map)) => Some(map.clone()),
                    _ => None,
                };
                presence.enter(data).await
            })
            .await
    }

    /// Update presence data on a channel through the middleware chain.
    ///
    /// # Errors
    ///
    /// Same as [`Switchboard::enter_presence`].
    pub async fn update_presence(&mut self, channel: &str, data: Map<String, Value>) -> Result<()> {
        let provider = self.bound()?;
        let channel = self.channel(channel, None)?;
        let presence = channel.presence()?;
        let context = MiddlewareContext::new(provider, Operation::PresenceUpdate)
            .with_channel(channel)
            .with_data(PAYLOAD_KEY, Value::Object(data));

        self.chain
            .execute(context, |ctx| async move {
                let data = match ctx.data.get(PAYLOAD_KEY) {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Map::new(),
                };
                presence.update(data).await
            })
            .await
    }

    /// Leave presence on a channel through the middleware chain.
    ///
    /// # Errors
    ///
    /// Same as [`Switchboard::enter_presence`].
    pub async fn leave_presence(&mut self, channel: &str) -> Result<()> {
        let provider = self.bound()?;
        let channel = self.channel(channel, None)?;
        let presence = channel.presence()?;
        let context =
            MiddlewareContext::new(provider, Operation::PresenceLeave).with_channel(channel);

        self.chain
            .execute(context, |_| async move { presence.leave().await })
            .await
    }
}

impl fmt::Debug for Switchboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Switchboard")
            .field("provider", &self.provider.as_ref().map(|p| p.name()))
            .field("channels", &self.channel_names())
            .field("middleware", &self.chain)
            .field("initialized", &self.initialized)
            .finish()
    }
}

fn context_event(context: &MiddlewareContext) -> Result<String> {
    context
        .data
        .get(EVENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SwitchboardError::invalid_config("Operation context has no event name"))
}

/// Leave every cached channel in name order, then clear the cache.
///
/// Under `AbortOnFirstError` the first failure is returned and the cache is
/// left untouched; under `LeaveAll` failures are collected and returned.
async fn leave_channels(
    channels: &mut HashMap<String, Arc<dyn Channel>>,
    policy: DisconnectPolicy,
) -> Result<Vec<(String, SwitchboardError)>> {
    let mut names: Vec<String> = channels.keys().cloned().collect();
    names.sort();

    let mut failures = Vec::new();
    for name in names {
        let Some(channel) = channels.get(&name).map(Arc::clone) else {
            continue;
        };
        match channel.leave().await {
            Ok(()) => debug!(channel = %name, "Left channel"),
            Err(err) if policy == DisconnectPolicy::AbortOnFirstError => return Err(err),
            Err(err) => {
                warn!(channel = %name, error = %err, "Channel failed to leave");
                failures.push((name, err));
            }
        }
    }

    channels.clear();
    metrics::set_active_channels(0);
    Ok(failures)
}
