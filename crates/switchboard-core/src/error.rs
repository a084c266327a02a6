//! Error model shared by the facade, the middleware chain and every backend.
//!
//! Errors are identified by a stable [`ErrorCode`] rather than by type, so a
//! caller can branch on the code regardless of which backend produced it.

use crate::message::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Failed to establish a connection.
    ConnectionFailed,
    /// Authentication was rejected.
    AuthenticationFailed,
    /// A channel operation failed.
    ChannelError,
    /// A message could not be published.
    PublishFailed,
    /// A subscription could not be registered.
    SubscriptionFailed,
    /// The operation timed out.
    Timeout,
    /// The backend rate-limited the caller.
    RateLimited,
    /// The operation is not valid in the current state.
    InvalidState,
    /// The backend does not support the requested feature.
    NotSupported,
    /// Transport-level failure.
    NetworkError,
    /// Configuration was rejected.
    InvalidConfig,
    /// No backend is bound to the facade.
    ProviderNotInitialized,
    /// The named channel does not exist.
    ChannelNotFound,
    /// Anything else.
    Unknown,
}

impl ErrorCode {
    /// The stable string form of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "connection-failed",
            ErrorCode::AuthenticationFailed => "authentication-failed",
            ErrorCode::ChannelError => "channel-error",
            ErrorCode::PublishFailed => "publish-failed",
            ErrorCode::SubscriptionFailed => "subscription-failed",
            ErrorCode::Timeout => "timeout",
            ErrorCode::RateLimited => "rate-limited",
            ErrorCode::InvalidState => "invalid-state",
            ErrorCode::NotSupported => "not-supported",
            ErrorCode::NetworkError => "network-error",
            ErrorCode::InvalidConfig => "invalid-config",
            ErrorCode::ProviderNotInitialized => "provider-not-initialized",
            ErrorCode::ChannelNotFound => "channel-not-found",
            ErrorCode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapped underlying failure.
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The error value returned by every fallible Switchboard operation.
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct SwitchboardError {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    pub details: Option<Map<String, Value>>,
    /// Underlying failure, if this error wraps one.
    #[source]
    pub cause: Option<ErrorCause>,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Convenience alias for `Result<T, SwitchboardError>`.
pub type Result<T> = std::result::Result<T, SwitchboardError>;

impl SwitchboardError {
    /// Create an error with the given code.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            cause: None,
            timestamp: now_millis(),
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a single detail field.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Wrap an underlying failure.
    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Connection could not be established.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message)
    }

    /// Authentication was rejected.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthenticationFailed, message)
    }

    /// A channel operation failed.
    #[must_use]
    pub fn channel(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ChannelError, message)
    }

    /// An operation exceeded its deadline.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// Publishing failed.
    #[must_use]
    pub fn publish_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PublishFailed, message)
    }

    /// Subscribing failed.
    #[must_use]
    pub fn subscription_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SubscriptionFailed, message)
    }

    /// The operation is not valid in the current state.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    /// Configuration was rejected.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, message)
    }

    /// No backend is bound.
    #[must_use]
    pub fn provider_not_initialized() -> Self {
        Self::new(ErrorCode::ProviderNotInitialized, "Provider not initialized")
    }

    /// A capability flag is off for the named backend.
    #[must_use]
    pub fn not_supported(feature: &str, provider: &str) -> Self {
        Self::new(
            ErrorCode::NotSupported,
            format!("Feature \"{feature}\" is not supported by provider \"{provider}\""),
        )
        .with_detail("feature", feature)
        .with_detail("provider", provider)
    }

    /// Check the error code.
    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    /// Serializable view of the error.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "name": "SwitchboardError",
            "message": self.message,
            "code": self.code,
            "details": self.details,
            "timestamp": self.timestamp,
            "cause": self.cause.as_ref().map(|c| c.to_string()),
        })
    }
}

impl From<serde_json::Error> for SwitchboardError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_config(format!("Serialization error: {err}")).with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_not_supported_names_feature_and_provider() {
        let err = SwitchboardError::not_supported("presence", "MockProvider");
        assert!(err.is(ErrorCode::NotSupported));
        assert!(err.message.contains("\"presence\""));
        assert!(err.message.contains("\"MockProvider\""));

        let details = err.details.unwrap();
        assert_eq!(details["feature"], "presence");
        assert_eq!(details["provider"], "MockProvider");
    }

    #[test]
    fn test_error_codes_are_kebab_case() {
        assert_eq!(ErrorCode::ProviderNotInitialized.to_string(), "provider-not-initialized");
        assert_eq!(
            serde_json::to_value(ErrorCode::NotSupported).unwrap(),
            "not-supported"
        );
    }

    #[test]
    fn test_cause_is_exposed_as_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket reset");
        let err = SwitchboardError::connection("connect failed").with_cause(io);

        assert_eq!(err.source().unwrap().to_string(), "socket reset");
        assert_eq!(err.to_json()["cause"], "socket reset");
        assert_eq!(err.to_string(), "[connection-failed] connect failed");
    }

    #[test]
    fn test_timestamp_is_set() {
        let err = SwitchboardError::timeout("slow");
        assert!(err.timestamp > 0);
    }
}
