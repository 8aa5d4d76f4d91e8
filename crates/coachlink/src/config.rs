//! Client configuration.
//!
//! Configuration for the gateway session client, including:
//! - Control-plane (HTTP) location
//! - Primary and optional secondary event-channel endpoints
//! - Reconnection, keep-alive and confirmation timing
//! - The numbering plan used to normalize recipients

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::GatewayError;
use crate::phone::PhonePlan;

/// Reconnection and failover timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on the retry delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Consecutive failures against one endpoint before switching to the other.
    pub max_attempts: u32,
    /// Bound on a single connection handshake, in seconds.
    pub handshake_timeout_secs: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            max_attempts: 5,
            handshake_timeout_secs: 20,
        }
    }
}

/// Liveness checking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeepAliveSettings {
    /// How often to compare transport and session state, in seconds.
    pub check_interval_secs: u64,
    /// How often to ping the control plane while connected, in seconds.
    pub ping_interval_secs: u64,
}

impl Default for KeepAliveSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            ping_interval_secs: 30,
        }
    }
}

/// Session handshake timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    /// How long to wait for `fully_connected` after acknowledging a
    /// confirmation request, in seconds.
    pub confirmation_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: 10,
        }
    }
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Base URL of the HTTP control plane.
    pub control_plane_url: String,
    /// Path prefix for control-plane routes.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Control-plane request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Event-channel WebSocket URL tried first.
    pub primary_endpoint: String,
    /// Fallback event-channel WebSocket URL.
    #[serde(default)]
    pub secondary_endpoint: Option<String>,
    /// Reconnection settings.
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Keep-alive settings.
    #[serde(default)]
    pub keep_alive: KeepAliveSettings,
    /// Session settings.
    #[serde(default)]
    pub session: SessionSettings,
    /// Recipient numbering plan.
    #[serde(default)]
    pub phone: PhonePlan,
}

fn default_api_prefix() -> String {
    "/api/whatsapp".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    10
}

impl GatewayConfig {
    /// Minimal configuration pointing at a single local gateway.
    #[must_use]
    pub fn new(control_plane_url: impl Into<String>, primary_endpoint: impl Into<String>) -> Self {
        Self {
            control_plane_url: control_plane_url.into(),
            api_prefix: default_api_prefix(),
            request_timeout_secs: default_request_timeout_secs(),
            primary_endpoint: primary_endpoint.into(),
            secondary_endpoint: None,
            reconnect: ReconnectSettings::default(),
            keep_alive: KeepAliveSettings::default(),
            session: SessionSettings::default(),
            phone: PhonePlan::default(),
        }
    }

    /// Set the fallback endpoint.
    #[must_use]
    pub fn with_secondary_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.secondary_endpoint = Some(endpoint.into());
        self
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, GatewayError> {
        let config: Self =
            toml::from_str(content).map_err(|e| GatewayError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, GatewayError> {
        toml::to_string_pretty(self).map_err(|e| GatewayError::Config(format!("cannot render TOML: {e}")))
    }

    /// Validate and write the configuration as TOML, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the file cannot
    /// be written.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), GatewayError> {
        self.validate()?;
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), GatewayError> {
        check_url("control_plane_url", &self.control_plane_url, &["http", "https"])?;
        check_url("primary_endpoint", &self.primary_endpoint, &["ws", "wss"])?;
        if let Some(secondary) = &self.secondary_endpoint {
            check_url("secondary_endpoint", secondary, &["ws", "wss"])?;
        }

        if !self.api_prefix.is_empty() && !self.api_prefix.starts_with('/') {
            return Err(GatewayError::Config(
                "api_prefix must start with '/'".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let reconnect = &self.reconnect;
        if reconnect.base_delay_ms == 0 {
            return Err(GatewayError::Config(
                "reconnect.base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if reconnect.base_delay_ms > reconnect.max_delay_ms {
            return Err(GatewayError::Config(
                "reconnect.base_delay_ms cannot exceed reconnect.max_delay_ms".to_string(),
            ));
        }
        if reconnect.max_attempts == 0 {
            return Err(GatewayError::Config(
                "reconnect.max_attempts must be greater than 0".to_string(),
            ));
        }
        if reconnect.handshake_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "reconnect.handshake_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.keep_alive.check_interval_secs == 0 || self.keep_alive.ping_interval_secs == 0 {
            return Err(GatewayError::Config(
                "keep_alive intervals must be greater than 0".to_string(),
            ));
        }

        if self.session.confirmation_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "session.confirmation_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let phone = &self.phone;
        for (field, value) in [
            ("phone.country_code", &phone.country_code),
            ("phone.mobile_indicator", &phone.mobile_indicator),
        ] {
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
                return Err(GatewayError::Config(format!(
                    "{field} must be a non-empty string of digits"
                )));
            }
        }
        for (field, value) in [
            ("phone.mobile_trunk_prefix", &phone.mobile_trunk_prefix),
            ("phone.trunk_prefix", &phone.trunk_prefix),
        ] {
            if !value.chars().all(|c| c.is_ascii_digit()) {
                return Err(GatewayError::Config(format!("{field} must contain only digits")));
            }
        }
        if !phone.area_leading_digits.iter().all(char::is_ascii_digit) {
            return Err(GatewayError::Config(
                "phone.area_leading_digits must contain only digits".to_string(),
            ));
        }

        Ok(())
    }

    /// Control-plane request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Confirmation handshake deadline.
    #[must_use]
    pub const fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.session.confirmation_timeout_secs)
    }
}

fn check_url(field: &str, value: &str, schemes: &[&str]) -> Result<(), GatewayError> {
    if value.is_empty() {
        return Err(GatewayError::Config(format!("{field} cannot be empty")));
    }
    let url = Url::parse(value).map_err(|e| GatewayError::Config(format!("{field} is not a valid URL: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(GatewayError::Config(format!(
            "{field} must use one of: {}",
            schemes.join(", ")
        )));
    }
    Ok(())
}
