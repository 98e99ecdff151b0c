//! OAuth2 token lifecycle: issuance, caching, proactive refresh.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use kis_core::types::{AccessToken, Credentials};
use kis_core::AuthError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const TOKEN_ENDPOINT: &str = "/oauth2/tokenP";
const REVOKE_ENDPOINT: &str = "/oauth2/revokeP";

/// Default lifetime when the response omits `expires_in` (24 hours).
const DEFAULT_EXPIRES_IN: i64 = 86_400;

/// Default safety margin in seconds: a token within 5 minutes of expiry is
/// refreshed before use.
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 300;

/// Issues and revokes access tokens against the credential exchange.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, credentials: &Credentials) -> Result<AccessToken, AuthError>;

    async fn revoke(&self, credentials: &Credentials, token: &AccessToken)
        -> Result<(), AuthError>;
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    appkey: &'a str,
    appsecret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
    // Error envelope fields on rejection
    error_code: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
struct RevokeRequest<'a> {
    appkey: &'a str,
    appsecret: &'a str,
    token: &'a str,
}

/// Production issuer backed by the KIS OAuth2 endpoints.
pub struct RestTokenIssuer {
    http: reqwest::Client,
}

impl RestTokenIssuer {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TokenIssuer for RestTokenIssuer {
    async fn issue(&self, credentials: &Credentials) -> Result<AccessToken, AuthError> {
        let url = format!("{}{}", credentials.environment.base_url(), TOKEN_ENDPOINT);
        let body = TokenRequest {
            grant_type: "client_credentials",
            appkey: &credentials.app_key,
            appsecret: &credentials.app_secret,
        };

        debug!(url = %url, "Requesting access token");

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        match payload.access_token {
            Some(value) => {
                let now = Utc::now();
                let expires_in = payload.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
                info!(environment = %credentials.environment, "Access token issued");
                Ok(AccessToken {
                    value,
                    token_type: payload.token_type.unwrap_or_else(|| "Bearer".to_string()),
                    issued_at: now,
                    expires_at: now + Duration::seconds(expires_in),
                    environment: credentials.environment,
                })
            }
            None => Err(AuthError::Rejected {
                code: payload
                    .error_code
                    .unwrap_or_else(|| status.as_u16().to_string()),
                message: payload
                    .error_description
                    .unwrap_or_else(|| "no access token in response".to_string()),
            }),
        }
    }

    async fn revoke(
        &self,
        credentials: &Credentials,
        token: &AccessToken,
    ) -> Result<(), AuthError> {
        let url = format!("{}{}", credentials.environment.base_url(), REVOKE_ENDPOINT);
        let body = RevokeRequest {
            appkey: &credentials.app_key,
            appsecret: &credentials.app_secret,
            token: &token.value,
        };

        self.http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::Network(e.to_string()))?;

        info!("Access token revoked");
        Ok(())
    }
}

/// Owns the cached access token and its refresh cycle.
///
/// The cache slot sits behind an async mutex that is held across the
/// issuance await: concurrent callers hitting an expired-token window queue
/// on the lock, the first performs the refresh, and the rest observe the
/// fresh token when they acquire it. Exactly one refresh per window.
pub struct TokenManager {
    credentials: Credentials,
    issuer: Arc<dyn TokenIssuer>,
    cached: Mutex<Option<AccessToken>>,
    safety_margin: Duration,
}

impl TokenManager {
    pub fn new(credentials: Credentials, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self {
            credentials,
            issuer,
            cached: Mutex::new(None),
            safety_margin: Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
        }
    }

    /// Override the refresh safety margin.
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Return a token with at least the safety margin of lifetime left,
    /// refreshing first if needed.
    pub async fn valid_token(&self) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_valid(Utc::now(), self.safety_margin) {
                return Ok(token.clone());
            }
            debug!("Cached token within safety margin, refreshing");
        }

        let token = self.issuer.issue(&self.credentials).await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next call refreshes. Used by the
    /// dispatcher's one-shot 401 recovery.
    pub async fn invalidate(&self) {
        let mut cached = self.cached.lock().await;
        if cached.take().is_some() {
            warn!("Cached access token invalidated");
        }
    }

    /// Revoke the cached token upstream and clear the cache. A missing
    /// token is a no-op.
    pub async fn revoke(&self) -> Result<(), AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.take() {
            self.issuer.revoke(&self.credentials, &token).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kis_core::types::Environment;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIssuer {
        issued: AtomicUsize,
        lifetime_secs: i64,
    }

    impl CountingIssuer {
        fn new(lifetime_secs: i64) -> Self {
            Self {
                issued: AtomicUsize::new(0),
                lifetime_secs,
            }
        }
    }

    #[async_trait]
    impl TokenIssuer for CountingIssuer {
        async fn issue(&self, credentials: &Credentials) -> Result<AccessToken, AuthError> {
            // Simulate network latency so concurrent callers overlap
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            let now = Utc::now();
            Ok(AccessToken {
                value: format!("token-{n}"),
                token_type: "Bearer".to_string(),
                issued_at: now,
                expires_at: now + Duration::seconds(self.lifetime_secs),
                environment: credentials.environment,
            })
        }

        async fn revoke(
            &self,
            _credentials: &Credentials,
            _token: &AccessToken,
        ) -> Result<(), AuthError> {
            Ok(())
        }
    }

    fn credentials() -> Credentials {
        Credentials::new("key", "secret", "1234567801", Environment::Mock)
    }

    #[tokio::test]
    async fn test_single_flight_refresh() {
        let issuer = Arc::new(CountingIssuer::new(3600));
        let manager = Arc::new(TokenManager::new(credentials(), issuer.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.valid_token().await }));
        }

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.value, "token-0");
        }

        // All eight concurrent callers shared one refresh
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_token_triggers_refresh() {
        // Lifetime below the safety margin: every call sees an expired token
        let issuer = Arc::new(CountingIssuer::new(10));
        let manager = TokenManager::new(credentials(), issuer.clone())
            .with_safety_margin(Duration::seconds(60));

        manager.valid_token().await.unwrap();
        manager.valid_token().await.unwrap();

        assert_eq!(issuer.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_token_reused() {
        let issuer = Arc::new(CountingIssuer::new(3600));
        let manager = TokenManager::new(credentials(), issuer.clone());

        let first = manager.valid_token().await.unwrap();
        let second = manager.valid_token().await.unwrap();

        assert_eq!(first.value, second.value);
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let issuer = Arc::new(CountingIssuer::new(3600));
        let manager = TokenManager::new(credentials(), issuer.clone());

        manager.valid_token().await.unwrap();
        manager.invalidate().await;
        let token = manager.valid_token().await.unwrap();

        assert_eq!(token.value, "token-1");
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 2);
    }
}
