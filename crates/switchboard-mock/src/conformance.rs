//! Provider compatibility checks.
//!
//! [`check_provider`] exercises the behavior every backend must share:
//! the connect/disconnect lifecycle and a channel publish/subscribe round
//! trip with deferred delivery. Any backend can run it from its own tests.

use crate::testing::{wait_for, MessageRecorder};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{
    ChannelOptions, ConnectionState, Provider, Result, SwitchboardError,
};
use tracing::info;

const CHANNEL: &str = "conformance";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

fn ensure(condition: bool, message: impl Into<String>) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(SwitchboardError::invalid_state(message))
    }
}

/// Run every check against `provider`, then destroy it.
///
/// # Errors
///
/// Returns the first failed check as an `invalid-state` error, or any error
/// the backend raised along the way.
pub async fn check_provider(provider: Arc<dyn Provider>) -> Result<()> {
    let outcome = run_checks(provider.as_ref()).await;
    provider.destroy().await?;
    outcome?;
    info!(provider = provider.name(), "Provider passed conformance checks");
    Ok(())
}

async fn run_checks(provider: &dyn Provider) -> Result<()> {
    provider.connect(None).await?;
    ensure(
        provider.connection_state() == ConnectionState::Connected,
        format!("expected connected after connect, got {}", provider.connection_state()),
    )?;

    provider.disconnect().await?;
    ensure(
        provider.connection_state() == ConnectionState::Disconnected,
        format!("expected disconnected after disconnect, got {}", provider.connection_state()),
    )?;

    provider.connect(None).await?;
    let channel = provider.channel(CHANNEL, ChannelOptions::default())?;
    ensure(channel.name() == CHANNEL, "channel name does not match")?;

    let again = provider.channel(CHANNEL, ChannelOptions::default())?;
    ensure(
        switchboard_core::same_channel(&channel, &again),
        "channel() returned a different object for the same name",
    )?;

    let recorder = MessageRecorder::new();
    let subscription = channel.subscribe("test", recorder.handler()).await?;
    channel.publish("test", json!({ "data": "test" })).await?;
    ensure(
        recorder.is_empty(),
        "handler ran before publish returned control",
    )?;

    let probe = recorder.clone();
    wait_for(move || !probe.is_empty(), DELIVERY_TIMEOUT, Duration::from_millis(5)).await?;
    ensure(recorder.len() == 1, "expected exactly one delivery")?;
    ensure(
        recorder.data() == vec![json!({ "data": "test" })],
        "delivered payload does not match",
    )?;

    subscription.unsubscribe();
    channel.leave().await?;
    provider.disconnect().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockProvider;
    use switchboard_core::ErrorCode;

    #[tokio::test]
    async fn test_mock_provider_conforms() {
        check_provider(Arc::new(MockProvider::new())).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_provider_is_reported() {
        let provider = MockProvider::builder().simulate_error(true).build();
        let err = check_provider(Arc::new(provider)).await.unwrap_err();
        assert!(err.is(ErrorCode::ConnectionFailed));
    }
}
