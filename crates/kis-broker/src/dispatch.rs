//! Rate-limited REST dispatch with bounded retries.

use kis_core::types::AccessToken;
use kis_core::{ApiError, AuthError, ExponentialBackoff, TradingError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::token::TokenManager;

/// Trailing window the request ceiling applies to.
const WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window admission scheduler.
///
/// Each caller reserves the earliest dispatch instant that keeps at most
/// `max_per_window` reservations inside any trailing one-second window.
/// Reservations are taken in call order, so admission is FIFO.
#[derive(Debug)]
struct SlidingWindow {
    max_per_window: usize,
    slots: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new(max_per_window: usize) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            slots: VecDeque::new(),
        }
    }

    /// Reserve the next dispatch slot relative to `now`.
    fn reserve(&mut self, now: Instant) -> Instant {
        while self
            .slots
            .front()
            .is_some_and(|&slot| slot + WINDOW < now)
        {
            self.slots.pop_front();
        }

        let slot = if self.slots.len() < self.max_per_window {
            now
        } else {
            // The new slot opens when the Nth most recent reservation
            // leaves the trailing window.
            let anchor = self.slots[self.slots.len() - self.max_per_window];
            (anchor + WINDOW).max(now)
        };

        self.slots.push_back(slot);
        slot
    }
}

/// Serializes outbound REST calls under a requests-per-second ceiling and
/// retries transient failures with exponential backoff.
pub struct RateLimitedDispatcher {
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
    window: Mutex<SlidingWindow>,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    shutdown: watch::Receiver<bool>,
}

impl RateLimitedDispatcher {
    pub fn new(http: reqwest::Client, tokens: Arc<TokenManager>, max_per_second: usize) -> Self {
        // Receiver with no live sender: never signalled
        let (_tx, rx) = watch::channel(false);
        Self {
            http,
            tokens,
            window: Mutex::new(SlidingWindow::new(max_per_second)),
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
            shutdown: rx,
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, max_attempts: u32, base: Duration, max_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff_base = base;
        self.backoff_max = max_delay;
        self
    }

    /// Attach a shutdown signal; a pending admission wait, backoff sleep or
    /// in-flight request unblocks with `Cancelled` when it flips to true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Resolves when the shutdown signal flips to true; never resolves if
    /// the sender is gone.
    async fn cancelled(&self) {
        let mut rx = self.shutdown.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Wait for a dispatch slot under the rate ceiling.
    async fn admit(&self) -> Result<(), TradingError> {
        let slot = {
            let mut window = self.window.lock().await;
            window.reserve(Instant::now())
        };

        tokio::select! {
            _ = tokio::time::sleep_until(slot) => Ok(()),
            _ = self.cancelled() => Err(TradingError::Cancelled),
        }
    }

    /// Send a request built from a fresh access token, enforcing the rate
    /// ceiling and the retry policy. Returns the response once the HTTP
    /// status is a success; payload-level result codes are the caller's
    /// concern.
    pub async fn send<B>(&self, build: B) -> Result<reqwest::Response, TradingError>
    where
        B: Fn(&reqwest::Client, &AccessToken) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut backoff = ExponentialBackoff::new(self.backoff_base, self.backoff_max, 0.1);
        let mut auth_retried = false;
        let mut attempts = 0u32;

        loop {
            self.admit().await?;
            attempts += 1;

            let token = tokio::select! {
                result = self.tokens.valid_token() => result.map_err(TradingError::Auth)?,
                _ = self.cancelled() => return Err(TradingError::Cancelled),
            };
            let request = build(&self.http, &token);

            let result = tokio::select! {
                result = request.send() => result,
                _ = self.cancelled() => return Err(TradingError::Cancelled),
            };

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.as_u16() == 401 && !auth_retried {
                        // One-time token refresh, then a single retry
                        warn!("Received 401, refreshing access token");
                        auth_retried = true;
                        self.tokens.invalidate().await;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();

                    if status.as_u16() == 401 {
                        return Err(TradingError::Auth(AuthError::Rejected {
                            code: "401".to_string(),
                            message: body,
                        }));
                    }

                    if status.is_server_error() || status.as_u16() == 429 {
                        if attempts >= self.max_attempts {
                            return Err(ApiError::RetriesExhausted {
                                attempts,
                                last: format!("HTTP {}: {}", status.as_u16(), body),
                            }
                            .into());
                        }
                        let delay = backoff.next_delay();
                        warn!(
                            status = status.as_u16(),
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Transient HTTP failure, retrying"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.cancelled() => return Err(TradingError::Cancelled),
                        }
                        continue;
                    }

                    // Remaining 4xx indicate a client-side defect: never retried
                    debug!(status = status.as_u16(), "Request failed");
                    return Err(ApiError::Http {
                        status: status.as_u16(),
                        body,
                    }
                    .into());
                }
                Err(e) => {
                    if attempts >= self.max_attempts {
                        return Err(ApiError::RetriesExhausted {
                            attempts,
                            last: e.to_string(),
                        }
                        .into());
                    }
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transport failure, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancelled() => return Err(TradingError::Cancelled),
                    }
                }
            }
        }
    }
}
