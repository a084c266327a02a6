//! Connection, channel and provider options.
//!
//! All options are passed through opaquely to the bound backend. They are
//! `serde` types so they can be embedded in configuration files.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// HTTP method used against an authentication endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthMethod {
    Get,
    Post,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOptions {
    /// API key.
    pub key: Option<String>,
    /// Authentication token.
    pub token: Option<String>,
    /// Authentication endpoint URL.
    pub endpoint: Option<String>,
    /// Headers sent to the endpoint.
    pub headers: HashMap<String, String>,
    /// Parameters sent to the endpoint.
    pub params: HashMap<String, String>,
    /// Method used against the endpoint.
    pub method: Option<AuthMethod>,
}

/// Options for connecting a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionOptions {
    pub auth: Option<AuthOptions>,
    /// Force a new connection.
    pub force_new: Option<bool>,
    /// Connection timeout in milliseconds. Advisory: each backend enforces it.
    pub timeout: Option<u64>,
    pub auto_reconnect: Option<bool>,
    pub max_reconnect_attempts: Option<u32>,
    /// Reconnection interval in milliseconds.
    pub reconnect_interval: Option<u64>,
    /// Custom connection parameters.
    pub params: Map<String, Value>,
    /// Transport hints, in order of preference.
    pub transports: Option<Vec<String>>,
    /// Endpoint URL.
    pub url: Option<String>,
    /// Cluster selector.
    pub cluster: Option<String>,
}

impl ConnectionOptions {
    /// Layer `self` over `defaults`: fields set on `self` win, params merge key-wise.
    #[must_use]
    pub fn merged_over(self, defaults: &ConnectionOptions) -> ConnectionOptions {
        let mut params = defaults.params.clone();
        params.extend(self.params);

        ConnectionOptions {
            auth: self.auth.or_else(|| defaults.auth.clone()),
            force_new: self.force_new.or(defaults.force_new),
            timeout: self.timeout.or(defaults.timeout),
            auto_reconnect: self.auto_reconnect.or(defaults.auto_reconnect),
            max_reconnect_attempts: self
                .max_reconnect_attempts
                .or(defaults.max_reconnect_attempts),
            reconnect_interval: self.reconnect_interval.or(defaults.reconnect_interval),
            params,
            transports: self.transports.or_else(|| defaults.transports.clone()),
            url: self.url.or_else(|| defaults.url.clone()),
            cluster: self.cluster.or_else(|| defaults.cluster.clone()),
        }
    }

    /// Whether every field is unset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == ConnectionOptions::default()
    }
}

/// Channel-scoped authentication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelAuth {
    pub headers: HashMap<String, String>,
    pub params: HashMap<String, String>,
}

/// Options for channel creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    /// Encrypt traffic on this channel.
    pub encrypted: Option<bool>,
    /// Channel requires authentication.
    pub private: Option<bool>,
    /// Channel supports presence.
    pub presence: Option<bool>,
    /// Custom channel parameters.
    pub params: Map<String, Value>,
    pub auth: Option<ChannelAuth>,
}

impl ChannelOptions {
    /// Layer `self` over `defaults`: fields set on `self` win, params merge key-wise.
    #[must_use]
    pub fn merged_over(self, defaults: &ChannelOptions) -> ChannelOptions {
        let mut params = defaults.params.clone();
        params.extend(self.params);

        ChannelOptions {
            encrypted: self.encrypted.or(defaults.encrypted),
            private: self.private.or(defaults.private),
            presence: self.presence.or(defaults.presence),
            params,
            auth: self.auth.or_else(|| defaults.auth.clone()),
        }
    }

    #[must_use]
    pub fn with_presence(mut self, enabled: bool) -> Self {
        self.presence = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encrypted = Some(enabled);
        self
    }

    #[must_use]
    pub fn presence_enabled(&self) -> bool {
        self.presence.unwrap_or(false)
    }

    #[must_use]
    pub fn encryption_enabled(&self) -> bool {
        self.encrypted.unwrap_or(false)
    }
}

/// Provider-level tuning shared with the bound backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderOptions {
    pub debug: bool,
    /// Request timeout in milliseconds.
    pub timeout: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    /// Reconnection interval in milliseconds.
    pub reconnect_interval: Option<u64>,
    /// Queue messages while disconnected.
    pub queue_offline_messages: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_options_supplied_wins() {
        let mut defaults = ChannelOptions::default().with_presence(true).with_encryption(true);
        defaults.params.insert("region".into(), json!("eu"));
        defaults.params.insert("tier".into(), json!("free"));

        let mut supplied = ChannelOptions::default().with_presence(false);
        supplied.params.insert("tier".into(), json!("pro"));

        let merged = supplied.merged_over(&defaults);
        assert_eq!(merged.presence, Some(false));
        assert_eq!(merged.encrypted, Some(true));
        assert_eq!(merged.params["region"], "eu");
        assert_eq!(merged.params["tier"], "pro");
    }

    #[test]
    fn test_connection_options_merge() {
        let defaults = ConnectionOptions {
            timeout: Some(5_000),
            url: Some("wss://example.test".into()),
            ..Default::default()
        };
        let supplied = ConnectionOptions {
            timeout: Some(100),
            ..Default::default()
        };

        let merged = supplied.merged_over(&defaults);
        assert_eq!(merged.timeout, Some(100));
        assert_eq!(merged.url.as_deref(), Some("wss://example.test"));
        assert!(!merged.is_empty());
        assert!(ConnectionOptions::default().is_empty());
    }

    #[test]
    fn test_connection_options_from_toml() {
        let toml_str = r#"
            timeout = 2000
            autoReconnect = true
            transports = ["websocket"]

            [auth]
            token = "secret"
        "#;

        let options: ConnectionOptions = toml::from_str(toml_str).unwrap();
        assert_eq!(options.timeout, Some(2000));
        assert_eq!(options.auto_reconnect, Some(true));
        assert_eq!(options.auth.unwrap().token.as_deref(), Some("secret"));
    }
}
