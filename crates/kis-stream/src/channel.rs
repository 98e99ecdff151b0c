//! Resilient WebSocket subscription channel.
//!
//! State machine: `Disconnected -> Connecting -> Connected`, with
//! `Reconnecting` entered from `Connected` on transport loss. Subscriptions
//! are retained across reconnects and replayed before inbound processing
//! resumes; exhausting the reconnect budget surfaces a terminal
//! [`StreamEvent::StreamLost`] to every subscriber.

use futures::{SinkExt, StreamExt};
use kis_broker::TokenManager;
use kis_core::types::{ChannelKind, StreamEvent};
use kis_core::{ExponentialBackoff, StreamError, TradingError, TradingResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::frames::{parse_frame, subscribe_frame, unsubscribe_frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Callback invoked for every event on a subscription.
pub type StreamCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Channel tuning knobs.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Consecutive failed attempts before the channel gives up.
    pub max_reconnect_attempts: u32,
    /// Initial reconnect backoff delay.
    pub backoff_base: Duration,
    /// Backoff cap.
    pub backoff_max: Duration,
    /// Treat the connection as lost after this long without any frame.
    pub idle_timeout: Duration,
    /// A session at least this long resets the backoff.
    pub stable_threshold: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(60),
            stable_threshold: Duration::from_secs(60),
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

struct Subscription {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

/// Poison-tolerant lock helper: a panicked holder never blocks the channel.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Inner {
    tokens: Arc<TokenManager>,
    config: StreamConfig,
    ws_url: Mutex<String>,
    state: Mutex<ChannelState>,
    subscriptions: Mutex<HashMap<(String, ChannelKind), Subscription>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    approval_key: Mutex<Option<String>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl Inner {
    fn set_state(&self, state: ChannelState) {
        *lock(&self.state) = state;
    }

    /// Fetch an approval key and open the socket.
    async fn open_socket(&self) -> Result<WsStream, StreamError> {
        let token = self
            .tokens
            .valid_token()
            .await
            .map_err(|e| StreamError::Connection(e.to_string()))?;
        *lock(&self.approval_key) = Some(token.value);

        let url = lock(&self.ws_url).clone();
        debug!(url = %url, "Opening WebSocket");

        let connected = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| StreamError::Connection("connection timeout".to_string()))?
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        Ok(connected.0)
    }

    /// Queue subscribe frames for every retained subscription.
    fn replay_subscriptions(&self) {
        let key = lock(&self.approval_key).clone().unwrap_or_default();
        let subscriptions = lock(&self.subscriptions);
        if subscriptions.is_empty() {
            return;
        }
        if let Some(outbound) = lock(&self.outbound).as_ref() {
            info!(count = subscriptions.len(), "Replaying subscriptions");
            for (symbol, kind) in subscriptions.keys() {
                let _ = outbound.send(subscribe_frame(&key, *kind, symbol));
            }
        }
    }

    /// Route an inbound data frame to its subscription. Malformed or
    /// unmatched frames are logged and dropped, never raised.
    fn dispatch_frame(&self, text: &str) {
        match parse_frame(text) {
            Some((kind, symbol, event)) => {
                let subscriptions = lock(&self.subscriptions);
                match subscriptions.get(&(symbol.clone(), kind)) {
                    Some(subscription) => {
                        if subscription.tx.send(event).is_err() {
                            debug!(symbol = %symbol, "Subscriber dropped, frame discarded");
                        }
                    }
                    None => debug!(symbol = %symbol, ?kind, "No subscription for frame"),
                }
            }
            None => debug!("Dropping unmatched or malformed frame"),
        }
    }

    /// Deliver the terminal notification to every subscriber.
    fn broadcast_stream_lost(&self) {
        let subscriptions = lock(&self.subscriptions);
        for subscription in subscriptions.values() {
            let _ = subscription.tx.send(StreamEvent::StreamLost);
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost { duration: Duration, reason: String },
}

/// Drive one connected session until shutdown or transport loss.
async fn run_session(
    inner: &Inner,
    ws: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let connected_at = Instant::now();
    let (mut write, mut read) = ws.split();

    let lost = |reason: String| SessionEnd::Lost {
        duration: connected_at.elapsed(),
        reason,
    };

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                let stop = match changed {
                    Ok(()) => *shutdown_rx.borrow(),
                    Err(_) => true,
                };
                if stop {
                    let _ = write.close().await;
                    return SessionEnd::Shutdown;
                }
            }

            frame = outbound_rx.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            return lost(format!("control frame send failed: {e}"));
                        }
                    }
                    // Sender cleared: the channel is being torn down
                    None => return SessionEnd::Shutdown,
                }
            }

            next = tokio::time::timeout(inner.config.idle_timeout, read.next()) => {
                match next {
                    Err(_) => return lost("idle timeout".to_string()),
                    Ok(None) => return lost("stream ended".to_string()),
                    Ok(Some(Err(e))) => return lost(e.to_string()),
                    Ok(Some(Ok(message))) => match message {
                        Message::Text(text) => inner.dispatch_frame(&text),
                        Message::Ping(payload) => {
                            if write.send(Message::Pong(payload)).await.is_err() {
                                return lost("pong send failed".to_string());
                            }
                        }
                        Message::Close(_) => return lost("closed by server".to_string()),
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Reconnecting session loop: replay subscriptions, run the session, back
/// off and reconnect on loss, give up after the attempt budget.
async fn run_loop(
    inner: Arc<Inner>,
    mut ws: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = ExponentialBackoff::new(
        inner.config.backoff_base,
        inner.config.backoff_max,
        0.1,
    );
    let mut failures: u32 = 0;

    loop {
        // Frames queued against a dead connection are stale; the replay
        // below re-sends the whole table.
        while outbound_rx.try_recv().is_ok() {}

        inner.replay_subscriptions();
        inner.set_state(ChannelState::Connected);

        match run_session(&inner, ws, &mut outbound_rx, &mut shutdown_rx).await {
            SessionEnd::Shutdown => {
                info!("Stream channel shut down");
                inner.set_state(ChannelState::Disconnected);
                return;
            }
            SessionEnd::Lost { duration, reason } => {
                warn!(reason = %reason, session_secs = duration.as_secs(), "Stream connection lost");

                if duration >= inner.config.stable_threshold {
                    backoff.reset();
                    failures = 0;
                }

                inner.set_state(ChannelState::Reconnecting);

                let reconnected = loop {
                    if failures >= inner.config.max_reconnect_attempts {
                        break None;
                    }

                    let delay = backoff.next_delay();
                    debug!(
                        attempt = failures + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                inner.set_state(ChannelState::Disconnected);
                                return;
                            }
                        }
                    }

                    match inner.open_socket().await {
                        Ok(stream) => break Some(stream),
                        Err(e) => {
                            failures += 1;
                            warn!(error = %e, attempt = failures, "Reconnection attempt failed");
                        }
                    }
                };

                match reconnected {
                    Some(stream) => {
                        info!("Stream reconnected");
                        ws = stream;
                    }
                    None => {
                        error!(
                            attempts = inner.config.max_reconnect_attempts,
                            "Reconnection attempts exhausted, stream lost"
                        );
                        inner.set_state(ChannelState::Disconnected);
                        inner.broadcast_stream_lost();
                        return;
                    }
                }
            }
        }
    }
}

/// Maintains the WebSocket connection, the subscription table, reconnection
/// and message demultiplexing to per-symbol callbacks.
pub struct StreamChannel {
    inner: Arc<Inner>,
}

impl StreamChannel {
    pub fn new(tokens: Arc<TokenManager>, config: StreamConfig) -> Self {
        let ws_url = tokens.credentials().environment.ws_url().to_string();
        Self {
            inner: Arc::new(Inner {
                tokens,
                config,
                ws_url: Mutex::new(ws_url),
                state: Mutex::new(ChannelState::Disconnected),
                subscriptions: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                approval_key: Mutex::new(None),
                shutdown: Mutex::new(None),
            }),
        }
    }

    /// Override the WebSocket endpoint (local gateways, tests).
    pub fn with_ws_url(self, url: impl Into<String>) -> Self {
        *lock(&self.inner.ws_url) = url.into();
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *lock(&self.inner.state)
    }

    /// Number of retained subscriptions.
    pub fn subscription_count(&self) -> usize {
        lock(&self.inner.subscriptions).len()
    }

    /// Open the channel: authenticate, connect with bounded attempts, and
    /// start the session loop.
    pub async fn connect(&self) -> TradingResult<()> {
        {
            let mut state = lock(&self.inner.state);
            if *state != ChannelState::Disconnected {
                return Err(StreamError::Connection("channel already active".to_string()).into());
            }
            *state = ChannelState::Connecting;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *lock(&self.inner.shutdown) = Some(shutdown_tx);

        let mut backoff = ExponentialBackoff::new(
            self.inner.config.backoff_base,
            self.inner.config.backoff_max,
            0.1,
        );
        let mut failures = 0;

        let ws = loop {
            match self.inner.open_socket().await {
                Ok(stream) => break stream,
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, attempt = failures, "Connection attempt failed");
                    if failures >= self.inner.config.max_reconnect_attempts {
                        self.inner.set_state(ChannelState::Disconnected);
                        return Err(e.into());
                    }
                    let delay = backoff.next_delay();
                    let mut shutdown = shutdown_rx.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                self.inner.set_state(ChannelState::Disconnected);
                                return Err(TradingError::Cancelled);
                            }
                        }
                    }
                }
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *lock(&self.inner.outbound) = Some(outbound_tx);

        info!("Stream channel connected");
        tokio::spawn(run_loop(
            self.inner.clone(),
            ws,
            outbound_rx,
            shutdown_rx,
        ));
        Ok(())
    }

    /// Register a subscription. When connected the subscribe frame is sent
    /// immediately; during reconnection it is retained and replayed once the
    /// connection is back. Must be called from within the tokio runtime.
    pub fn subscribe(
        &self,
        symbol: &str,
        kind: ChannelKind,
        callback: StreamCallback,
    ) -> TradingResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        // One dispatch task per subscription: a slow or panicking callback
        // stalls only its own channel, never the read loop.
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                callback(event);
            }
        });

        lock(&self.inner.subscriptions).insert((symbol.to_string(), kind), Subscription { tx });
        debug!(symbol, ?kind, "Subscription registered");

        if self.state() == ChannelState::Connected {
            let key = lock(&self.inner.approval_key).clone().unwrap_or_default();
            if let Some(outbound) = lock(&self.inner.outbound).as_ref() {
                let _ = outbound.send(subscribe_frame(&key, kind, symbol));
            }
        }
        Ok(())
    }

    /// Remove a subscription and send the unsubscribe frame if connected.
    /// A key that does not exist is a no-op, never an error.
    pub fn unsubscribe(&self, symbol: &str, kind: ChannelKind) {
        let removed = lock(&self.inner.subscriptions)
            .remove(&(symbol.to_string(), kind))
            .is_some();
        if !removed {
            return;
        }
        debug!(symbol, ?kind, "Subscription removed");

        if self.state() == ChannelState::Connected {
            let key = lock(&self.inner.approval_key).clone().unwrap_or_default();
            if let Some(outbound) = lock(&self.inner.outbound).as_ref() {
                let _ = outbound.send(unsubscribe_frame(&key, kind, symbol));
            }
        }
    }

    /// User-initiated terminal shutdown: cancels any in-flight reconnection
    /// and clears the subscription table.
    pub fn disconnect(&self) {
        if let Some(shutdown) = lock(&self.inner.shutdown).take() {
            let _ = shutdown.send(true);
        }
        *lock(&self.inner.outbound) = None;
        lock(&self.inner.subscriptions).clear();
        self.inner.set_state(ChannelState::Disconnected);
        info!("Stream channel disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use kis_broker::TokenIssuer;
    use kis_core::types::{AccessToken, Credentials, Environment, PriceTick};
    use kis_core::AuthError;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tokio::net::TcpListener;

    struct StaticIssuer;

    #[async_trait]
    impl TokenIssuer for StaticIssuer {
        async fn issue(&self, credentials: &Credentials) -> Result<AccessToken, AuthError> {
            let now = Utc::now();
            Ok(AccessToken {
                value: "approval".to_string(),
                token_type: "Bearer".to_string(),
                issued_at: now,
                expires_at: now + chrono::Duration::seconds(3600),
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

    fn token_manager() -> Arc<TokenManager> {
        let credentials = Credentials::new("key", "secret", "1234567801", Environment::Mock);
        Arc::new(TokenManager::new(credentials, Arc::new(StaticIssuer)))
    }

    fn fast_config() -> StreamConfig {
        StreamConfig {
            max_reconnect_attempts: 5,
            backoff_base: Duration::from_millis(20),
            backoff_max: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(5),
            stable_threshold: Duration::from_secs(60),
        }
    }

    fn price_frame(symbol: &str, price: i64) -> String {
        json!({
            "header": {"tr_id": "H0STCNT0"},
            "body": {
                "tr_key": symbol,
                "mksc_shrn_iscd": symbol,
                "stck_prpr": price.to_string(),
                "prdy_vrss": "0",
                "prdy_vrss_rate": "0.0",
                "acml_vol": "1",
            }
        })
        .to_string()
    }

    fn assert_subscribe_frame(text: &str, symbol: &str) {
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["header"]["tr_type"], "1");
        assert_eq!(value["body"]["input"]["tr_key"], symbol);
    }

    async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn collector() -> (StreamCallback, Arc<Mutex<Vec<StreamEvent>>>) {
        let events: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: StreamCallback = Arc::new(move |event| {
            lock(&sink).push(event);
        });
        (callback, events)
    }

    fn prices(events: &Arc<Mutex<Vec<StreamEvent>>>) -> Vec<PriceTick> {
        lock(events)
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Price(tick) => Some(tick.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_subscription_round_trip_and_idempotence() {
        let channel = StreamChannel::new(token_manager(), fast_config());
        let (callback, _events) = collector();

        channel
            .subscribe("005930", ChannelKind::Price, callback)
            .unwrap();
        assert_eq!(channel.subscription_count(), 1);

        channel.unsubscribe("005930", ChannelKind::Price);
        assert_eq!(channel.subscription_count(), 0);

        // Unsubscribing a missing key is a no-op
        channel.unsubscribe("005930", ChannelKind::Price);
        channel.unsubscribe("000660", ChannelKind::Orderbook);
        assert_eq!(channel.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_ticks_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let frame = ws.next().await.unwrap().unwrap().into_text().unwrap();
            assert_subscribe_frame(&frame, "005930");

            for price in [71000, 71100, 71200] {
                ws.send(Message::Text(price_frame("005930", price)))
                    .await
                    .unwrap();
            }

            // Hold the connection until the client disconnects
            let _ = ws.next().await;
        });

        let channel = StreamChannel::new(token_manager(), fast_config())
            .with_ws_url(format!("ws://{addr}"));
        channel.connect().await.unwrap();

        let (callback, events) = collector();
        channel
            .subscribe("005930", ChannelKind::Price, callback)
            .unwrap();

        wait_until(|| prices(&events).len() >= 3, Duration::from_secs(5)).await;

        let ticks = prices(&events);
        assert_eq!(ticks[0].price, dec!(71000));
        assert_eq!(ticks[1].price, dec!(71100));
        assert_eq!(ticks[2].price, dec!(71200));

        channel.disconnect();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_replays_subscriptions_before_new_ticks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // Session 1: deliver one tick, then drop the transport
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let frame = ws.next().await.unwrap().unwrap().into_text().unwrap();
            assert_subscribe_frame(&frame, "005930");
            ws.send(Message::Text(price_frame("005930", 71000)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(ws);

            // Session 2: the subscription must be replayed before any tick
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let frame = ws.next().await.unwrap().unwrap().into_text().unwrap();
            assert_subscribe_frame(&frame, "005930");
            ws.send(Message::Text(price_frame("005930", 72000)))
                .await
                .unwrap();

            let _ = ws.next().await;
        });

        let channel = StreamChannel::new(token_manager(), fast_config())
            .with_ws_url(format!("ws://{addr}"));
        channel.connect().await.unwrap();

        let (callback, events) = collector();
        channel
            .subscribe("005930", ChannelKind::Price, callback)
            .unwrap();

        wait_until(|| prices(&events).len() >= 2, Duration::from_secs(5)).await;

        let ticks = prices(&events);
        assert_eq!(ticks[0].price, dec!(71000));
        assert_eq!(ticks[1].price, dec!(72000));
        assert_eq!(channel.state(), ChannelState::Connected);
        // The subscription survived the reconnect without caller action
        assert_eq!(channel.subscription_count(), 1);

        channel.disconnect();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_reconnects_surface_stream_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text(price_frame("005930", 71000)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Drop both the session and the listener: reconnects are refused
        });

        let mut config = fast_config();
        config.max_reconnect_attempts = 2;

        let channel = StreamChannel::new(token_manager(), config)
            .with_ws_url(format!("ws://{addr}"));
        channel.connect().await.unwrap();

        let (callback, events) = collector();
        channel
            .subscribe("005930", ChannelKind::Price, callback)
            .unwrap();

        wait_until(
            || {
                lock(&events)
                    .iter()
                    .any(|event| matches!(event, StreamEvent::StreamLost))
            },
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(channel.state(), ChannelState::Disconnected);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_fails_after_bounded_attempts() {
        // Bind then immediately drop to get a refused port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = fast_config();
        config.max_reconnect_attempts = 2;

        let channel = StreamChannel::new(token_manager(), config)
            .with_ws_url(format!("ws://{addr}"));

        let result = channel.connect().await;
        assert!(matches!(
            result,
            Err(TradingError::Stream(StreamError::Connection(_)))
        ));
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }
}
