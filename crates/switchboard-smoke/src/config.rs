//! Smoke run configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (SWITCHBOARD_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use switchboard_core::{ChannelOptions, ConnectionOptions, DisconnectPolicy, ProviderOptions};

/// Smoke run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reference backend settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Facade settings.
    #[serde(default)]
    pub switchboard: FacadeConfig,

    /// What the run does.
    #[serde(default)]
    pub scenario: ScenarioConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Reference backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Reported backend name.
    #[serde(default)]
    pub name: Option<String>,

    /// Extra connect latency in milliseconds.
    #[serde(default)]
    pub simulate_delay_ms: u64,

    /// Messages of history kept per channel.
    #[serde(default)]
    pub history_limit: Option<usize>,

    #[serde(default)]
    pub options: ProviderOptions,
}

/// Facade configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacadeConfig {
    #[serde(default)]
    pub disconnect_policy: DisconnectPolicy,

    /// Token injected into connect options.
    #[serde(default = "default_auth_token")]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub channel_defaults: ChannelOptions,

    #[serde(default)]
    pub connection: ConnectionOptions,
}

/// Scenario configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Channel to publish on.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Event name of every published message.
    #[serde(default = "default_event")]
    pub event: String,

    /// Number of messages to publish.
    #[serde(default = "default_messages")]
    pub messages: usize,

    /// Enter presence on the channel.
    #[serde(default = "default_true")]
    pub presence: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_auth_token() -> Option<String> {
    std::env::var("SWITCHBOARD_AUTH_TOKEN").ok()
}

fn default_channel() -> String {
    std::env::var("SWITCHBOARD_CHANNEL").unwrap_or_else(|_| "room".to_string())
}

fn default_event() -> String {
    "ping".to_string()
}

fn default_messages() -> usize {
    std::env::var("SWITCHBOARD_MESSAGES")
        .ok()
        .and_then(|n| n.parse().ok())
        .unwrap_or(10)
}

fn default_true() -> bool {
    true
}

fn default_metrics_enabled() -> bool {
    std::env::var("SWITCHBOARD_METRICS").is_ok_and(|v| v == "1" || v == "true")
}

fn default_metrics_port() -> u16 {
    std::env::var("SWITCHBOARD_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090)
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            disconnect_policy: DisconnectPolicy::default(),
            auth_token: default_auth_token(),
            channel_defaults: ChannelOptions::default(),
            connection: ConnectionOptions::default(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            event: default_event(),
            messages: default_messages(),
            presence: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `SWITCHBOARD_CONFIG`, a default path, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("SWITCHBOARD_CONFIG") {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        let config_paths = [
            "switchboard.toml",
            "/etc/switchboard/switchboard.toml",
            "~/.config/switchboard/switchboard.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
