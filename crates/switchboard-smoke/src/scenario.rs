//! The smoke scenario: one full session against the reference backend.

use crate::config::Config;
use anyhow::{ensure, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchboard_core::{
    AuthTokenMiddleware, ChannelOptions, HistoryOptions, MetricsMiddleware, Provider, ProviderEvent,
    Switchboard, SwitchboardConfig, TracingMiddleware,
};
use switchboard_mock::testing::MessageRecorder;
use switchboard_mock::MockProvider;
use tracing::{debug, info};

/// What a run observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub provider: String,
    pub published: usize,
    pub received: usize,
    pub history: usize,
    pub presence_members: usize,
    pub authenticated: bool,
    pub elapsed: Duration,
}

fn build_provider(config: &Config) -> Arc<MockProvider> {
    let mut builder = MockProvider::builder()
        .simulate_delay(Duration::from_millis(config.provider.simulate_delay_ms))
        .provider_options(config.provider.options.clone());
    if let Some(name) = &config.provider.name {
        builder = builder.name(name.clone());
    }
    if let Some(limit) = config.provider.history_limit {
        builder = builder.history_limit(limit);
    }
    Arc::new(builder.build())
}

fn build_switchboard(config: &Config, provider: Arc<MockProvider>) -> Result<Switchboard> {
    let facade = &config.switchboard;
    let mut switchboard_config = SwitchboardConfig::new(provider)
        .with_middleware(Arc::new(TracingMiddleware))
        .with_middleware(Arc::new(MetricsMiddleware))
        .with_channel_defaults(facade.channel_defaults.clone())
        .with_connection_defaults(facade.connection.clone())
        .with_provider_options(config.provider.options.clone())
        .with_disconnect_policy(facade.disconnect_policy);
    if let Some(token) = &facade.auth_token {
        switchboard_config =
            switchboard_config.with_middleware(Arc::new(AuthTokenMiddleware::new(token.clone())));
    }
    Ok(Switchboard::create(switchboard_config)?)
}

/// Run the scenario described by `config`.
///
/// # Errors
///
/// Returns any facade error, or an error if fewer messages arrive than
/// were published.
pub async fn run(config: &Config) -> Result<Report> {
    let started = Instant::now();
    let scenario = &config.scenario;
    let provider = build_provider(config);
    let mut switchboard = build_switchboard(config, Arc::clone(&provider))?;

    switchboard.on(
        ProviderEvent::StateChange,
        Arc::new(|data: &Value| debug!(change = %data, "Connection state changed")),
    )?;

    switchboard.connect(None).await?;
    let authenticated = provider
        .connection_options()
        .and_then(|options| options.auth)
        .and_then(|auth| auth.token)
        .is_some();
    info!(
        provider = provider.name(),
        connection_id = provider.connection_id(),
        "Connected"
    );

    let options = ChannelOptions {
        presence: Some(scenario.presence),
        ..ChannelOptions::default()
    };
    let channel = switchboard.channel(&scenario.channel, Some(options))?;

    let recorder = MessageRecorder::new();
    let subscription = switchboard
        .subscribe(&scenario.channel, &scenario.event, recorder.handler())
        .await?;

    for n in 0..scenario.messages {
        switchboard
            .publish(&scenario.channel, &scenario.event, json!({ "n": n }))
            .await?;
    }
    provider.settled().await;
    ensure!(
        recorder.len() == scenario.messages,
        "published {} messages but received {}",
        scenario.messages,
        recorder.len()
    );

    let history = channel.history(HistoryOptions::default()).await?.len();

    let mut presence_members = 0;
    if scenario.presence {
        let mut data = Map::new();
        data.insert("role".to_string(), Value::from("smoke"));
        switchboard.enter_presence(&scenario.channel, Some(data)).await?;
        presence_members = channel.presence()?.count().await?;
        switchboard.leave_presence(&scenario.channel).await?;
    }

    subscription.unsubscribe();
    switchboard.destroy().await?;
    provider.settled().await;

    Ok(Report {
        provider: provider.name().to_string(),
        published: scenario.messages,
        received: recorder.len(),
        history,
        presence_members,
        authenticated,
        elapsed: started.elapsed(),
    })
}
