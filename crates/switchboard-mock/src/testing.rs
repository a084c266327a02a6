//! Helpers for tests that drive a backend.

use crate::MockProvider;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use switchboard_core::message::now_millis;
use switchboard_core::{Channel, Message, MessageHandler, Provider, Result, SwitchboardError};

/// Poll `condition` every `interval` until it holds.
///
/// # Errors
///
/// Returns a `timeout` error if the condition still fails after `timeout`.
pub async fn wait_for(
    condition: impl Fn() -> bool,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return Err(SwitchboardError::timeout("Timeout waiting for condition"));
        }
        tokio::time::sleep(interval).await;
    }
    Ok(())
}

/// Collects every message delivered to its handlers.
#[derive(Debug, Clone, Default)]
pub struct MessageRecorder {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl MessageRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A handler that appends to this recorder.
    #[must_use]
    pub fn handler(&self) -> MessageHandler {
        let messages = Arc::clone(&self.messages);
        Arc::new(move |message: &Message| {
            messages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message.clone());
        })
    }

    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.lock().clone()
    }

    /// Payloads in delivery order.
    #[must_use]
    pub fn data(&self) -> Vec<Value> {
        self.lock().iter().map(|m| m.data.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Subscribe to `event` and collect messages until `expected` arrived or
/// `timeout` passed, then unsubscribe. Returns whatever was collected.
///
/// # Errors
///
/// Returns the channel's error if the subscription fails.
pub async fn wait_for_messages(
    channel: &dyn Channel,
    event: &str,
    expected: usize,
    timeout: Duration,
) -> Result<Vec<Message>> {
    let recorder = MessageRecorder::new();
    let subscription = channel.subscribe(event, recorder.handler()).await?;

    let probe = recorder.clone();
    let _ = wait_for(move || probe.len() >= expected, timeout, Duration::from_millis(10)).await;

    subscription.unsubscribe();
    Ok(recorder.messages())
}

/// Synthetic messages: ids `msg-<i>`, events cycling over `event-0..2`.
#[must_use]
pub fn generate_messages(count: usize, channel: &str) -> Vec<Message> {
    let base = now_millis();
    (0..count)
        .map(|i| Message {
            id: format!("msg-{i}"),
            channel: channel.to_string(),
            event: format!("event-{}", i % 3),
            data: json!({ "index": i, "test": true }),
            timestamp: base + i as u64,
            metadata: None,
        })
        .collect()
}

/// A fresh reference backend that is already connected.
///
/// # Errors
///
/// Returns the error of `connect`.
pub async fn connected_provider() -> Result<Arc<MockProvider>> {
    let provider = Arc::new(MockProvider::new());
    provider.connect(None).await?;
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use switchboard_core::{ChannelOptions, ConnectionState, ErrorCode};

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let err = wait_for(|| false, Duration::from_millis(30), Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn test_wait_for_succeeds_eventually() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        wait_for(
            move || counter.fetch_add(1, Ordering::SeqCst) >= 2,
            Duration::from_secs(1),
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert!(polls.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_generate_messages() {
        let messages = generate_messages(4, "test");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3].id, "msg-3");
        assert_eq!(messages[3].event, "event-0");
        assert_eq!(messages[1].data, json!({"index": 1, "test": true}));
        assert!(messages[0].timestamp < messages[1].timestamp);
    }

    #[tokio::test]
    async fn test_wait_for_messages_collects() {
        let provider = connected_provider().await.unwrap();
        assert_eq!(provider.connection_state(), ConnectionState::Connected);
        let channel = provider.channel("feed", ChannelOptions::default()).unwrap();

        let publisher = Arc::clone(&channel);
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("tick", json!(1)).await.unwrap();
            publisher.publish("tick", json!(2)).await.unwrap();
        });

        let messages = wait_for_messages(channel.as_ref(), "tick", 2, Duration::from_secs(1))
            .await
            .unwrap();
        task.await.unwrap();
        assert_eq!(messages.len(), 2);
    }
}
