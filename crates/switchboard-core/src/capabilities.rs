//! Capability descriptor returned by every backend.
//!
//! Callers check these flags before invoking optional features. Components
//! that find a flag switched off fail with `not-supported` themselves rather
//! than forwarding the call to the backend.

use crate::error::{Result, SwitchboardError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authentication modes a backend accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationModes {
    /// Token-based authentication.
    pub token: bool,
    /// API key authentication.
    pub api_key: bool,
    /// Custom callback/endpoint authentication.
    pub custom: bool,
}

/// Optional features a backend may support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub presence: bool,
    pub history: bool,
    pub encryption: bool,
    pub binary: bool,
    pub acknowledgments: bool,
    pub webhooks: bool,
    pub authentication: AuthenticationModes,
}

/// A single optional feature, used for gating checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Presence,
    History,
    Encryption,
    Binary,
    Acknowledgments,
    Webhooks,
}

impl Feature {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Presence => "presence",
            Feature::History => "history",
            Feature::Encryption => "encryption",
            Feature::Binary => "binary",
            Feature::Acknowledgments => "acknowledgments",
            Feature::Webhooks => "webhooks",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Capabilities {
    /// Every feature switched on.
    #[must_use]
    pub fn all() -> Self {
        Self {
            presence: true,
            history: true,
            encryption: true,
            binary: true,
            acknowledgments: true,
            webhooks: true,
            authentication: AuthenticationModes {
                token: true,
                api_key: true,
                custom: true,
            },
        }
    }

    /// Check whether a feature is supported.
    #[must_use]
    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Presence => self.presence,
            Feature::History => self.history,
            Feature::Encryption => self.encryption,
            Feature::Binary => self.binary,
            Feature::Acknowledgments => self.acknowledgments,
            Feature::Webhooks => self.webhooks,
        }
    }

    /// Fail with `not-supported` naming the feature and backend when the flag is off.
    ///
    /// # Errors
    ///
    /// Returns a `not-supported` error if the feature is unavailable.
    pub fn require(&self, feature: Feature, provider: &str) -> Result<()> {
        if self.supports(feature) {
            Ok(())
        } else {
            Err(SwitchboardError::not_supported(feature.as_str(), provider))
        }
    }
}
