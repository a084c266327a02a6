//! The in-process reference backend.

use crate::channel::MockChannel;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use switchboard_core::{
    validate_channel_name, Capabilities, Channel, ChannelOptions, ConnectionOptions,
    ConnectionState, Dispatcher, EventHandler, Feature, ListenerId, Provider, ProviderEvent,
    ProviderOptions, Registry, Result, SwitchboardError,
};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Name reported by the reference backend.
pub const MOCK_PROVIDER_NAME: &str = "MockProvider";
/// Version reported by the reference backend.
pub const MOCK_PROVIDER_VERSION: &str = "1.0.0";

/// Simulated handshake latency for connect and disconnect.
const HANDSHAKE: Duration = Duration::from_millis(10);

/// State shared by a provider and every channel and presence it creates.
pub(crate) struct Shared {
    pub(crate) name: String,
    capabilities: RwLock<Capabilities>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) connection_id: String,
    pub(crate) history_limit: Option<usize>,
    next_member: AtomicU64,
}

impl Shared {
    pub(crate) fn capabilities(&self) -> Capabilities {
        *self
            .capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn require(&self, feature: Feature) -> Result<()> {
        self.capabilities().require(feature, &self.name)
    }

    pub(crate) fn next_member_id(&self) -> String {
        let n = self.next_member.fetch_add(1, Ordering::Relaxed);
        format!("member-{}-{n}", self.connection_id)
    }
}

fn generate_connection_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("conn_{timestamp:x}")
}

/// Builder for [`MockProvider`].
#[derive(Debug, Clone, Default)]
pub struct MockProviderBuilder {
    name: Option<String>,
    capabilities: Option<Capabilities>,
    simulate_error: bool,
    simulate_delay: Duration,
    history_limit: Option<usize>,
    options: ProviderOptions,
}

impl MockProviderBuilder {
    /// Override the reported backend name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Make every `connect` fail.
    #[must_use]
    pub fn simulate_error(mut self, enabled: bool) -> Self {
        self.simulate_error = enabled;
        self
    }

    /// Extra latency added to every `connect`.
    #[must_use]
    pub fn simulate_delay(mut self, delay: Duration) -> Self {
        self.simulate_delay = delay;
        self
    }

    /// Keep at most `limit` messages of history per channel.
    #[must_use]
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Provider-level options. `timeout` becomes the default connect timeout.
    #[must_use]
    pub fn provider_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn build(self) -> MockProvider {
        let shared = Shared {
            name: self.name.unwrap_or_else(|| MOCK_PROVIDER_NAME.to_string()),
            capabilities: RwLock::new(
                self.capabilities
                    .unwrap_or_else(MockProvider::default_capabilities),
            ),
            dispatcher: Dispatcher::new(),
            connection_id: generate_connection_id(),
            history_limit: self.history_limit,
            next_member: AtomicU64::new(1),
        };

        debug!(provider = %shared.name, connection = %shared.connection_id, "Mock provider created");

        MockProvider {
            shared: Arc::new(shared),
            state: Mutex::new(ConnectionState::Disconnected),
            channels: DashMap::new(),
            listeners: Registry::new(),
            options: Mutex::new(None),
            simulate_error: AtomicBool::new(self.simulate_error),
            simulate_delay_ms: AtomicU64::new(
                u64::try_from(self.simulate_delay.as_millis()).unwrap_or(u64::MAX),
            ),
            default_timeout: self.options.timeout,
            destroyed: AtomicBool::new(false),
        }
    }
}

/// In-memory backend: channels and presence live in this process and every
/// handler call is deferred through a [`Dispatcher`].
pub struct MockProvider {
    shared: Arc<Shared>,
    state: Mutex<ConnectionState>,
    channels: DashMap<String, Arc<MockChannel>>,
    listeners: Registry<ProviderEvent, EventHandler>,
    options: Mutex<Option<ConnectionOptions>>,
    simulate_error: AtomicBool,
    simulate_delay_ms: AtomicU64,
    default_timeout: Option<u64>,
    destroyed: AtomicBool,
}

impl MockProvider {
    /// Create a provider with default capabilities.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> MockProviderBuilder {
        MockProviderBuilder::default()
    }

    /// Everything except webhooks.
    #[must_use]
    pub fn default_capabilities() -> Capabilities {
        Capabilities {
            webhooks: false,
            ..Capabilities::all()
        }
    }

    pub fn set_simulate_error(&self, enabled: bool) {
        self.simulate_error.store(enabled, Ordering::SeqCst);
    }

    pub fn set_simulate_delay(&self, delay: Duration) {
        self.simulate_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    /// Replace the capability descriptor.
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        *self
            .shared
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = capabilities;
    }

    /// Force a connection state and emit `state_change`.
    pub fn set_connection_state(&self, state: ConnectionState) {
        self.transition(state);
    }

    /// Options passed to the last `connect`.
    #[must_use]
    pub fn connection_options(&self) -> Option<ConnectionOptions> {
        self.options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every live channel, sorted by name.
    #[must_use]
    pub fn channels(&self) -> Vec<Arc<MockChannel>> {
        let mut channels: Vec<Arc<MockChannel>> =
            self.channels.iter().map(|e| Arc::clone(e.value())).collect();
        channels.sort_by(|a, b| a.name().cmp(b.name()));
        channels
    }

    /// The concrete channel called `name`, if it exists.
    #[must_use]
    pub fn mock_channel(&self, name: &str) -> Option<Arc<MockChannel>> {
        self.channels.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Publish on an existing channel as if the message arrived from elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `channel-not-found` if no channel called `channel` exists.
    pub async fn simulate_message(&self, channel: &str, event: &str, data: Value) -> Result<()> {
        let target = self.mock_channel(channel).ok_or_else(|| {
            SwitchboardError::new(
                switchboard_core::ErrorCode::ChannelNotFound,
                format!("Channel \"{channel}\" does not exist"),
            )
        })?;
        target.publish(event, data).await
    }

    /// Emit a provider event to every handler registered for it.
    pub fn emit(&self, event: ProviderEvent, data: Value) {
        let handlers = self.listeners.get(&event);
        for handler in handlers {
            let data = data.clone();
            self.shared.dispatcher.schedule(move || handler(&data));
        }
    }

    /// Wait until every deferred delivery from this provider has run.
    pub async fn settled(&self) {
        self.shared.dispatcher.settled().await;
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.shared.connection_id
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.lock_state(), state);
        debug!(provider = %self.shared.name, from = %previous, to = %state, "Connection state changed");
        self.emit(ProviderEvent::StateChange, json!({ "state": state.as_str() }));
    }

    async fn handshake(&self) {
        let delay = Duration::from_millis(self.simulate_delay_ms.load(Ordering::SeqCst));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        tokio::time::sleep(HANDSHAKE).await;
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn version(&self) -> &str {
        MOCK_PROVIDER_VERSION
    }

    async fn connect(&self, options: Option<ConnectionOptions>) -> Result<()> {
        if self.simulate_error.load(Ordering::SeqCst) {
            warn!(provider = %self.shared.name, "Simulated connection error");
            return Err(SwitchboardError::connection("Simulated connection error"));
        }

        let timeout = options
            .as_ref()
            .and_then(|o| o.timeout)
            .or(self.default_timeout);
        *self.options.lock().unwrap_or_else(PoisonError::into_inner) = options;
        self.transition(ConnectionState::Connecting);

        match timeout {
            Some(ms) => {
                let limit = Duration::from_millis(ms);
                if tokio::time::timeout(limit, self.handshake()).await.is_err() {
                    let err = SwitchboardError::timeout(format!(
                        "Connection timed out after {ms}ms"
                    ))
                    .with_detail("timeout", ms);
                    warn!(provider = %self.shared.name, timeout_ms = ms, "Connect timed out");
                    self.emit(ProviderEvent::Error, err.to_json());
                    self.transition(ConnectionState::Failed);
                    return Err(err);
                }
            }
            None => self.handshake().await,
        }

        *self.lock_state() = ConnectionState::Connected;
        info!(provider = %self.shared.name, connection = %self.shared.connection_id, "Connected");
        self.emit(ProviderEvent::Connected, json!({}));
        self.emit(
            ProviderEvent::StateChange,
            json!({ "state": ConnectionState::Connected.as_str() }),
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.transition(ConnectionState::Disconnecting);
        tokio::time::sleep(HANDSHAKE).await;

        *self.lock_state() = ConnectionState::Disconnected;
        info!(provider = %self.shared.name, "Disconnected");
        self.emit(ProviderEvent::Disconnected, json!({}));
        self.emit(
            ProviderEvent::StateChange,
            json!({ "state": ConnectionState::Disconnected.as_str() }),
        );
        Ok(())
    }

    fn channel(&self, name: &str, options: ChannelOptions) -> Result<Arc<dyn Channel>> {
        if let Some(existing) = self.channels.get(name) {
            let channel: Arc<dyn Channel> = existing.value().clone();
            return Ok(channel);
        }

        validate_channel_name(name)?;
        if options.encryption_enabled() {
            self.shared.require(Feature::Encryption)?;
        }

        let channel = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(channel = %name, "Creating mock channel");
                Arc::new(MockChannel::new(name, options, Arc::clone(&self.shared)))
            })
            .value()
            .clone();
        let channel: Arc<dyn Channel> = channel;
        Ok(channel)
    }

    fn connection_state(&self) -> ConnectionState {
        *self.lock_state()
    }

    fn on(&self, event: ProviderEvent, handler: EventHandler) -> ListenerId {
        self.listeners.insert(event, handler)
    }

    fn off(&self, event: ProviderEvent, id: ListenerId) -> bool {
        self.listeners.remove_under(&event, id)
    }

    fn capabilities(&self) -> Capabilities {
        self.shared.capabilities()
    }

    async fn destroy(&self) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }

        self.disconnect().await?;
        for channel in self.channels() {
            if let Err(err) = channel.leave().await {
                warn!(channel = %channel.name(), error = %err, "Channel failed to leave during destroy");
                return Err(err);
            }
        }
        self.channels.clear();
        self.listeners.clear();
        self.destroyed.store(true, Ordering::SeqCst);
        info!(provider = %self.shared.name, "Mock provider destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use switchboard_core::ErrorCode;

    fn record_states(provider: &MockProvider) -> Arc<StdMutex<Vec<String>>> {
        let states = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        provider.on(
            ProviderEvent::StateChange,
            Arc::new(move |data: &Value| {
                let state = data["state"].as_str().unwrap_or_default().to_string();
                sink.lock().unwrap().push(state);
            }),
        );
        states
    }

    #[tokio::test]
    async fn test_connect_lifecycle() {
        let provider = MockProvider::new();
        assert_eq!(provider.connection_state(), ConnectionState::Disconnected);
        let states = record_states(&provider);

        provider.connect(None).await.unwrap();
        assert_eq!(provider.connection_state(), ConnectionState::Connected);

        provider.disconnect().await.unwrap();
        assert_eq!(provider.connection_state(), ConnectionState::Disconnected);

        provider.settled().await;
        assert_eq!(
            *states.lock().unwrap(),
            vec!["connecting", "connected", "disconnecting", "disconnected"]
        );
    }

    #[test]
    fn test_simulated_delay_saturates() {
        let provider = MockProvider::builder().simulate_delay(Duration::MAX).build();
        assert_eq!(provider.simulate_delay_ms.load(Ordering::SeqCst), u64::MAX);

        provider.set_simulate_delay(Duration::from_millis(5));
        assert_eq!(provider.simulate_delay_ms.load(Ordering::SeqCst), 5);
        provider.set_simulate_delay(Duration::MAX);
        assert_eq!(provider.simulate_delay_ms.load(Ordering::SeqCst), u64::MAX);
    }

    #[tokio::test]
    async fn test_simulated_error() {
        let provider = MockProvider::builder().simulate_error(true).build();
        let err = provider.connect(None).await.unwrap_err();
        assert!(err.is(ErrorCode::ConnectionFailed));
        assert_eq!(err.message, "Simulated connection error");
        assert_eq!(provider.connection_state(), ConnectionState::Disconnected);

        provider.set_simulate_error(false);
        provider.connect(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_timeout_fails_connection() {
        let provider = MockProvider::builder()
            .simulate_delay(Duration::from_millis(200))
            .build();
        let errors = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&errors);
        provider.on(
            ProviderEvent::Error,
            Arc::new(move |_: &Value| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let options = ConnectionOptions {
            timeout: Some(20),
            ..Default::default()
        };
        let err = provider.connect(Some(options)).await.unwrap_err();

        assert!(err.is(ErrorCode::Timeout));
        assert_eq!(provider.connection_state(), ConnectionState::Failed);
        provider.settled().await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_stores_options() {
        let provider = MockProvider::new();
        let options = ConnectionOptions {
            url: Some("mock://local".into()),
            ..Default::default()
        };
        provider.connect(Some(options.clone())).await.unwrap();
        assert_eq!(provider.connection_options(), Some(options));
    }

    #[tokio::test]
    async fn test_off_removes_single_handler() {
        let provider = MockProvider::new();
        let calls = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&calls);
        let handler: EventHandler = Arc::new(move |_: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let first = provider.on(ProviderEvent::Connected, Arc::clone(&handler));
        let _second = provider.on(ProviderEvent::Connected, handler);

        assert!(provider.off(ProviderEvent::Connected, first));
        assert!(!provider.off(ProviderEvent::Disconnected, first));

        provider.connect(None).await.unwrap();
        provider.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_channel_identity_and_validation() {
        let provider = MockProvider::new();
        let a = provider.channel("room", ChannelOptions::default()).unwrap();
        let b = provider.channel("room", ChannelOptions::default()).unwrap();
        assert!(switchboard_core::same_channel(&a, &b));

        let err = provider.channel("", ChannelOptions::default()).unwrap_err();
        assert!(err.is(ErrorCode::InvalidConfig));
    }

    #[test]
    fn test_encrypted_channel_requires_capability() {
        let provider = MockProvider::builder()
            .capabilities(Capabilities {
                encryption: false,
                ..MockProvider::default_capabilities()
            })
            .build();

        let options = ChannelOptions::default().with_encryption(true);
        let err = provider.channel("secret", options).unwrap_err();
        assert!(err.is(ErrorCode::NotSupported));
        assert!(provider.mock_channel("secret").is_none());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let provider = MockProvider::new();
        provider.connect(None).await.unwrap();
        let channel = provider.channel("room", ChannelOptions::default()).unwrap();

        provider.destroy().await.unwrap();
        provider.destroy().await.unwrap();

        assert!(provider.is_destroyed());
        assert!(provider.channels().is_empty());
        assert_eq!(channel.state(), switchboard_core::ChannelState::Unsubscribed);
        assert_eq!(provider.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_destroy_can_be_retried() {
        let provider = MockProvider::new();
        provider.connect(None).await.unwrap();
        let channel = provider.channel("room", ChannelOptions::default()).unwrap();
        provider.mock_channel("room").unwrap().set_fail_leave(true);

        let err = provider.destroy().await.unwrap_err();
        assert!(err.is(ErrorCode::ChannelError));
        assert!(!provider.is_destroyed());
        assert_eq!(provider.channels().len(), 1);

        provider.mock_channel("room").unwrap().set_fail_leave(false);
        provider.destroy().await.unwrap();
        assert!(provider.is_destroyed());
        assert_eq!(channel.state(), switchboard_core::ChannelState::Unsubscribed);
    }
}
