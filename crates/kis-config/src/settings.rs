//! Configuration structures.

use kis_core::types::{Credentials, Environment};
use kis_risk::RiskLimits;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub websocket: WebSocketSettings,
    #[serde(default)]
    pub risk: RiskSettings,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// API credential and transport settings. This is the credential-source
/// boundary: values are resolved here and handed to the core as a
/// [`Credentials`] value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    pub app_key: String,
    pub app_secret: String,
    pub account_number: String,
    /// Use the mock (paper) environment
    pub mock: bool,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Request-per-second ceiling for the dispatcher
    pub rate_limit_per_sec: usize,
    /// Retry budget for transient failures
    pub max_retries: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            app_secret: String::new(),
            account_number: String::new(),
            mock: true,
            timeout_secs: 30,
            rate_limit_per_sec: 20,
            max_retries: 3,
        }
    }
}

impl ApiSettings {
    /// Resolve into credentials for the core.
    pub fn credentials(&self) -> Credentials {
        let environment = if self.mock {
            Environment::Mock
        } else {
            Environment::Live
        };
        Credentials::new(
            self.app_key.clone(),
            self.app_secret.clone(),
            self.account_number.clone(),
            environment,
        )
    }
}

/// WebSocket channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketSettings {
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_secs: u64,
    pub message_timeout_secs: u64,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_delay_secs: 1,
            message_timeout_secs: 60,
        }
    }
}

/// Risk settings wrapper; flattens into [`RiskLimits`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RiskSettings {
    #[serde(flatten)]
    pub limits: RiskLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.api.mock);
        assert_eq!(config.api.rate_limit_per_sec, 20);
        assert_eq!(config.websocket.max_reconnect_attempts, 5);
        assert!(config.risk.limits.validate().is_ok());
    }

    #[test]
    fn test_credentials_environment() {
        let mut api = ApiSettings::default();
        api.app_key = "key".to_string();
        assert_eq!(api.credentials().environment, Environment::Mock);

        api.mock = false;
        assert_eq!(api.credentials().environment, Environment::Live);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.api.rate_limit_per_sec, config.api.rate_limit_per_sec);
    }
}
