//! Channels of the reference backend.

use crate::presence::MockPresence;
use crate::provider::Shared;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use switchboard_core::{
    Channel, ChannelOptions, ChannelState, Feature, HistoryOptions, Message, MessageHandler,
    Presence, PublishOptions, Registry, Result, Subscription, SubscriptionId,
    SwitchboardError, WILDCARD,
};
use tracing::{debug, trace};

/// A channel held entirely in memory.
///
/// Published messages are appended to the channel history and delivered to
/// handlers bound to the event, then to wildcard handlers, each delivery on
/// its own deferred task.
pub struct MockChannel {
    name: String,
    options: ChannelOptions,
    shared: Arc<Shared>,
    state: Mutex<ChannelState>,
    handlers: Arc<Registry<String, MessageHandler>>,
    history: Mutex<VecDeque<Message>>,
    presence: OnceLock<Arc<MockPresence>>,
    fail_leave: AtomicBool,
}

impl MockChannel {
    pub(crate) fn new(name: &str, options: ChannelOptions, shared: Arc<Shared>) -> Self {
        Self {
            name: name.to_string(),
            options,
            shared,
            state: Mutex::new(ChannelState::Initialized),
            handlers: Arc::new(Registry::new()),
            history: Mutex::new(VecDeque::new()),
            presence: OnceLock::new(),
            fail_leave: AtomicBool::new(false),
        }
    }

    /// Make every later `leave` fail with `channel-error`.
    pub fn set_fail_leave(&self, enabled: bool) {
        self.fail_leave.store(enabled, Ordering::SeqCst);
    }

    /// Put the channel in the `Failed` state.
    pub fn fail(&self) {
        self.set_state(ChannelState::Failed);
    }

    /// Number of bound handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Number of messages kept in history.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.lock_history().len()
    }

    /// The concrete presence, once it has been requested.
    #[must_use]
    pub fn mock_presence(&self) -> Option<Arc<MockPresence>> {
        self.presence.get().map(Arc::clone)
    }

    fn lock_state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_history(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ChannelState) {
        let previous = std::mem::replace(&mut *self.lock_state(), state);
        if previous != state {
            debug!(channel = %self.name, from = %previous, to = %state, "Channel state changed");
        }
    }

    fn record(&self, message: Message) {
        let mut history = self.lock_history();
        history.push_back(message);
        if let Some(limit) = self.shared.history_limit {
            while history.len() > limit {
                history.pop_front();
            }
        }
    }

    fn deliver(&self, message: Message) -> usize {
        let mut targets = self.handlers.get(&message.event);
        if message.event != WILDCARD {
            targets.extend(self.handlers.get(&WILDCARD.to_string()));
        }

        let count = targets.len();
        let message = Arc::new(message);
        for handler in targets {
            let message = Arc::clone(&message);
            self.shared
                .dispatcher
                .schedule(move || handler(message.as_ref()));
        }
        count
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ChannelState {
        *self.lock_state()
    }

    fn options(&self) -> &ChannelOptions {
        &self.options
    }

    async fn subscribe(&self, event: &str, handler: MessageHandler) -> Result<Subscription> {
        match self.state() {
            ChannelState::Failed => {
                return Err(SwitchboardError::subscription_failed(format!(
                    "Channel \"{}\" has failed",
                    self.name
                ))
                .with_detail("channel", self.name.as_str()));
            }
            ChannelState::Initialized | ChannelState::Unsubscribed => {
                self.set_state(ChannelState::Subscribing);
            }
            _ => {}
        }

        let id = self.handlers.insert(event.to_string(), handler);
        self.set_state(ChannelState::Subscribed);
        debug!(channel = %self.name, event = %event, subscription = %id, "Handler bound");

        let registry = Arc::downgrade(&self.handlers);
        let key = event.to_string();
        Ok(Subscription::new(id, event, move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove_under(&key, id);
            }
        }))
    }

    async fn publish_with(
        &self,
        event: &str,
        data: Value,
        options: PublishOptions,
    ) -> Result<()> {
        if self.state() == ChannelState::Failed {
            return Err(SwitchboardError::publish_failed(format!(
                "Cannot publish on failed channel \"{}\"",
                self.name
            ))
            .with_detail("channel", self.name.as_str()));
        }
        if options.ack {
            self.shared.require(Feature::Acknowledgments)?;
        }

        let mut metadata = options.metadata.unwrap_or_default();
        metadata
            .connection_id
            .get_or_insert_with(|| self.shared.connection_id.clone());
        let message = Message::new(&self.name, event, data).with_metadata(metadata);

        self.record(message.clone());
        let handlers = self.deliver(message);
        trace!(channel = %self.name, event = %event, handlers, "Published");
        Ok(())
    }

    fn presence(&self) -> Result<Arc<dyn Presence>> {
        self.shared.require(Feature::Presence)?;
        if !self.options.presence_enabled() {
            return Err(SwitchboardError::not_supported(
                Feature::Presence.as_str(),
                &self.shared.name,
            ));
        }

        let presence = self
            .presence
            .get_or_init(|| Arc::new(MockPresence::new(&self.name, Arc::clone(&self.shared))));
        let presence: Arc<dyn Presence> = presence.clone();
        Ok(presence)
    }

    async fn history(&self, options: HistoryOptions) -> Result<Vec<Message>> {
        self.shared.require(Feature::History)?;
        let mut history = self.lock_history();
        Ok(options.apply(history.make_contiguous()))
    }

    async fn leave(&self) -> Result<()> {
        if self.fail_leave.load(Ordering::SeqCst) {
            return Err(
                SwitchboardError::channel(format!("Failed to leave channel \"{}\"", self.name))
                    .with_detail("channel", self.name.as_str()),
            );
        }

        self.set_state(ChannelState::Unsubscribing);
        if let Some(presence) = self.presence.get() {
            presence.leave().await?;
        }
        self.handlers.clear();
        self.set_state(ChannelState::Unsubscribed);
        debug!(channel = %self.name, "Left channel");
        Ok(())
    }

    fn unbind(&self, event: Option<&str>, subscription: Option<SubscriptionId>) {
        let removed = match (event, subscription) {
            (Some(event), Some(id)) => usize::from(self.handlers.remove_under(&event.to_string(), id)),
            (None, Some(id)) => usize::from(self.handlers.remove(id)),
            (Some(event), None) => self.handlers.remove_key(&event.to_string()),
            (None, None) => {
                let count = self.handlers.len();
                self.handlers.clear();
                count
            }
        };
        debug!(channel = %self.name, removed, "Handlers unbound");
    }
}

impl std::fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChannel")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MessageRecorder;
    use crate::MockProvider;
    use serde_json::json;
    use switchboard_core::{Capabilities, ErrorCode, Provider};

    fn open(provider: &MockProvider, name: &str) -> Arc<dyn Channel> {
        provider.channel(name, ChannelOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_delivery_is_deferred_and_filtered() {
        let provider = MockProvider::new();
        let channel = open(&provider, "room");
        let pings = MessageRecorder::new();
        let everything = MessageRecorder::new();

        channel.subscribe("ping", pings.handler()).await.unwrap();
        channel.subscribe_all(everything.handler()).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Subscribed);

        channel.publish("ping", json!({"n": 1})).await.unwrap();
        channel.publish("pong", json!({"n": 2})).await.unwrap();
        assert!(pings.is_empty());

        provider.settled().await;
        assert_eq!(pings.data(), vec![json!({"n": 1})]);
        assert_eq!(everything.len(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let provider = MockProvider::new();
        let channel = open(&provider, "room");
        let recorder = MessageRecorder::new();

        let sub = channel.subscribe("ping", recorder.handler()).await.unwrap();
        sub.unsubscribe();
        channel.publish("ping", json!(1)).await.unwrap();

        provider.settled().await;
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn test_unbind_variants() {
        let provider = MockProvider::new();
        let channel = open(&provider, "room");
        let mock = provider.mock_channel("room").unwrap();
        let recorder = MessageRecorder::new();

        let subs = channel
            .bind(vec![
                ("a".to_string(), recorder.handler()),
                ("a".to_string(), recorder.handler()),
                ("b".to_string(), recorder.handler()),
            ])
            .await
            .unwrap();
        assert_eq!(mock.handler_count(), 3);

        channel.unbind(Some("a"), Some(subs[0].id()));
        assert_eq!(mock.handler_count(), 2);
        channel.unbind(Some("a"), None);
        assert_eq!(mock.handler_count(), 1);
        channel.unbind(None, None);
        assert_eq!(mock.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_history_and_limit() {
        let provider = MockProvider::builder().history_limit(3).build();
        let channel = open(&provider, "log");
        for n in 0..5 {
            channel.publish("tick", json!(n)).await.unwrap();
        }

        let all = channel.history(HistoryOptions::default()).await.unwrap();
        let data: Vec<_> = all.iter().map(|m| m.data.clone()).collect();
        assert_eq!(data, vec![json!(2), json!(3), json!(4)]);

        let newest = channel
            .history(HistoryOptions {
                limit: Some(1),
                reverse: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(newest[0].data, json!(4));
    }

    #[tokio::test]
    async fn test_history_requires_capability() {
        let provider = MockProvider::builder()
            .capabilities(Capabilities {
                history: false,
                ..MockProvider::default_capabilities()
            })
            .build();
        let channel = open(&provider, "log");
        let err = channel.history(HistoryOptions::default()).await.unwrap_err();
        assert!(err.is(ErrorCode::NotSupported));
    }

    #[tokio::test]
    async fn test_ack_requires_capability() {
        let provider = MockProvider::new();
        provider.set_capabilities(Capabilities {
            acknowledgments: false,
            ..MockProvider::default_capabilities()
        });
        let channel = open(&provider, "room");

        let options = PublishOptions {
            ack: true,
            ..Default::default()
        };
        let err = channel
            .publish_with("ping", json!(null), options)
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::NotSupported));
        channel.publish("ping", json!(null)).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_channel_rejects_traffic() {
        let provider = MockProvider::new();
        let channel = open(&provider, "room");
        provider.mock_channel("room").unwrap().fail();

        assert_eq!(channel.state(), ChannelState::Failed);
        assert!(channel
            .publish("ping", json!(1))
            .await
            .unwrap_err()
            .is(ErrorCode::PublishFailed));
        assert!(channel
            .subscribe("ping", MessageRecorder::new().handler())
            .await
            .unwrap_err()
            .is(ErrorCode::SubscriptionFailed));
    }

    #[tokio::test]
    async fn test_leave_clears_handlers() {
        let provider = MockProvider::new();
        let channel = open(&provider, "room");
        let recorder = MessageRecorder::new();
        channel.subscribe_all(recorder.handler()).await.unwrap();

        channel.leave().await.unwrap();
        assert_eq!(channel.state(), ChannelState::Unsubscribed);

        channel.publish("ping", json!(1)).await.unwrap();
        provider.settled().await;
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn test_fail_leave() {
        let provider = MockProvider::new();
        let channel = open(&provider, "room");
        provider.mock_channel("room").unwrap().set_fail_leave(true);

        let err = channel.leave().await.unwrap_err();
        assert!(err.is(ErrorCode::ChannelError));
        assert_eq!(channel.state(), ChannelState::Initialized);
    }

    #[test]
    fn test_presence_gating() {
        let provider = MockProvider::new();
        let plain = open(&provider, "plain");
        let err = plain.presence().err().unwrap();
        assert!(err.is(ErrorCode::NotSupported));
        assert_eq!(err.details.as_ref().unwrap()["feature"], "presence");
        assert_eq!(err.details.as_ref().unwrap()["provider"], "MockProvider");

        let lobby = provider
            .channel("lobby", ChannelOptions::default().with_presence(true))
            .unwrap();
        let first = lobby.presence().unwrap();
        let second = lobby.presence().unwrap();
        assert_eq!(
            Arc::as_ptr(&first).cast::<()>(),
            Arc::as_ptr(&second).cast::<()>()
        );
    }
}
