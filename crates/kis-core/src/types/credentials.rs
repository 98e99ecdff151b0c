//! Credentials and access-token types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Trading environment (paper/mock vs. real money).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Virtual trading service (paper account).
    Mock,
    /// Real trading.
    Live,
}

impl Environment {
    /// Base URL for REST endpoints.
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Mock => "https://openapivts.koreainvestment.com:29443",
            Environment::Live => "https://openapi.koreainvestment.com:9443",
        }
    }

    /// Base URL for the real-time WebSocket endpoint.
    pub fn ws_url(&self) -> &'static str {
        match self {
            Environment::Mock => "ws://ops.koreainvestment.com:31000",
            Environment::Live => "ws://ops.koreainvestment.com:21000",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Mock => write!(f, "mock"),
            Environment::Live => write!(f, "live"),
        }
    }
}

/// Resolved API credentials. Immutable for the session lifetime; the core
/// never reads environment variables or files itself.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub app_key: String,
    pub app_secret: String,
    pub account_number: String,
    pub environment: Environment,
}

impl Credentials {
    pub fn new(
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        account_number: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            account_number: account_number.into(),
            environment,
        }
    }

    /// First 8 digits of the account number (CANO).
    pub fn account_prefix(&self) -> &str {
        let end = self.account_number.len().min(8);
        &self.account_number[..end]
    }

    /// Account product code, the digits after the first 8 (ACNT_PRDT_CD).
    pub fn account_product_code(&self) -> &str {
        if self.account_number.len() > 8 {
            &self.account_number[8..]
        } else {
            ""
        }
    }
}

/// An OAuth2 access token scoped to one environment.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub token_type: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub environment: Environment,
}

impl AccessToken {
    /// Remaining lifetime; zero if already expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Whether the token is still usable given a safety margin.
    pub fn is_valid(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now < self.expires_at - margin
    }

    /// Authorization header value, e.g. `Bearer <token>`.
    pub fn bearer(&self) -> String {
        format!("{} {}", self.token_type, self.value)
    }
}
