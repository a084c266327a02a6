//! Fixtures shared by the Switchboard benchmarks.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use switchboard_core::{
    Channel, ChannelOptions, Message, MessageHandler, Middleware, MiddlewareChain, MiddlewareContext,
    Provider, Result, Subscription, Switchboard, SwitchboardConfig,
};
use switchboard_mock::MockProvider;

/// Middleware with a `pre` and `post` hook that only bump a counter.
#[derive(Debug, Default)]
pub struct CountingMiddleware {
    hits: AtomicU64,
}

impl CountingMiddleware {
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Middleware for CountingMiddleware {
    fn name(&self) -> &str {
        "counting"
    }

    async fn pre(&self, _context: &mut MiddlewareContext) -> Result<()> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn post(&self, _context: &mut MiddlewareContext) -> Result<()> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Runtime for `to_async`.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
#[must_use]
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
}

/// A chain of `depth` counting middleware.
#[must_use]
pub fn chain(depth: usize) -> MiddlewareChain {
    let mut chain = MiddlewareChain::new();
    for _ in 0..depth {
        chain.use_middleware(Arc::new(CountingMiddleware::default()));
    }
    chain
}

/// A facade over a fresh reference backend with `depth` counting middleware.
///
/// # Errors
///
/// Returns an error if the facade cannot be created.
pub fn switchboard(depth: usize) -> Result<(Switchboard, Arc<MockProvider>)> {
    let provider = Arc::new(MockProvider::new());
    let mut config = SwitchboardConfig::new(Arc::clone(&provider) as Arc<dyn Provider>);
    for _ in 0..depth {
        config = config.with_middleware(Arc::new(CountingMiddleware::default()));
    }
    Ok((Switchboard::create(config)?, provider))
}

/// Handler that counts deliveries into `counter`.
#[must_use]
pub fn counting_handler(counter: &Arc<AtomicU64>) -> MessageHandler {
    let counter = Arc::clone(counter);
    Arc::new(move |_: &Message| {
        counter.fetch_add(1, Ordering::Relaxed);
    })
}

/// Open `name` on `provider` and attach `subscribers` counting handlers to `event`.
///
/// # Errors
///
/// Returns any backend error raised while subscribing.
pub async fn fanout_channel(
    provider: &MockProvider,
    name: &str,
    event: &str,
    subscribers: usize,
    counter: &Arc<AtomicU64>,
) -> Result<(Arc<dyn Channel>, Vec<Subscription>)> {
    let channel = provider.channel(name, ChannelOptions::default())?;
    let mut subscriptions = Vec::with_capacity(subscribers);
    for _ in 0..subscribers {
        subscriptions.push(channel.subscribe(event, counting_handler(counter)).await?);
    }
    Ok((channel, subscriptions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_core::Operation;

    #[tokio::test]
    async fn test_chain_runs_every_hook() {
        let mut chain = chain(3);
        let probe = Arc::new(CountingMiddleware::default());
        chain.use_middleware(Arc::clone(&probe) as Arc<dyn Middleware>);
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::new());
        let context = MiddlewareContext::new(provider, Operation::Publish);
        let value = chain.execute(context, |_| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(chain.len(), 4);
        assert_eq!(probe.hits(), 2);
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_subscriber() {
        let provider = MockProvider::new();
        provider.connect(None).await.unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        let (channel, _subs) = fanout_channel(&provider, "bench", "tick", 10, &counter)
            .await
            .unwrap();

        channel.publish("tick", json!({ "n": 1 })).await.unwrap();
        provider.settled().await;
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }

    #[tokio::test]
    async fn test_switchboard_fixture_publishes() {
        let (mut switchboard, provider) = switchboard(2).unwrap();
        switchboard.connect(None).await.unwrap();
        switchboard.publish("bench", "tick", json!(1)).await.unwrap();
        provider.settled().await;
        let history = provider.mock_channel("bench").unwrap().message_count();
        assert_eq!(history, 1);
        switchboard.destroy().await.unwrap();
    }
}
