//! The trading session facade.
//!
//! Owns the component cluster and wires the data flow: strategy signals and
//! caller orders pass the risk gate before they reach the gateway; stream
//! ticks update positions and daily P&L and drive stop-loss/take-profit
//! exits without blocking the read loop.

use chrono::Local;
use kis_broker::{
    Balance, Holding, OrderHistoryEntry, PriceQuote, RateLimitedDispatcher, RestGateway,
    RestTokenIssuer, TokenManager,
};
use kis_core::traits::Strategy;
use kis_core::types::{
    ChannelKind, Credentials, OrderRequest, OrderResult, OrderType, Position, Side, StrategySignal,
    StreamEvent,
};
use kis_core::{TradingError, TradingResult};
use kis_risk::{DailyPnl, RiskDecision, RiskGate, RiskLimits};
use kis_strategies::{MaCrossoverConfig, MaCrossoverStrategy};
use kis_stream::{StreamCallback, StreamChannel, StreamConfig};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Poison-tolerant lock helper.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Request-per-second ceiling for REST dispatch
    pub rate_limit_per_sec: usize,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Retry budget for transient REST failures
    pub max_retries: u32,
    /// Stream channel settings
    pub stream: StreamConfig,
    /// Risk limits enforced by the gate
    pub limits: RiskLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 20,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            stream: StreamConfig::default(),
            limits: RiskLimits::default(),
        }
    }
}

/// In-memory session state: the only state kept beyond a single call.
struct SessionState {
    positions: Mutex<HashMap<String, Position>>,
    daily_pnl: Mutex<DailyPnl>,
    portfolio_value: Mutex<Decimal>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            positions: Mutex::new(HashMap::new()),
            daily_pnl: Mutex::new(DailyPnl::new(Local::now().date_naive())),
            portfolio_value: Mutex::new(Decimal::ZERO),
        }
    }

    /// Apply a fill to the tracked position and fold the realized P&L into
    /// the daily accumulator. Flat positions are pruned.
    fn apply_fill(&self, symbol: &str, side: Side, quantity: Decimal, price: Decimal) {
        let today = Local::now().date_naive();
        let realized = {
            let mut positions = lock(&self.positions);
            let position = positions
                .entry(symbol.to_string())
                .or_insert_with(|| Position::flat(symbol));
            let realized = position.apply_fill(side, quantity, price);
            if position.is_flat() {
                positions.remove(symbol);
            }
            realized
        };
        if realized != Decimal::ZERO {
            lock(&self.daily_pnl).add_realized(today, realized);
        }
    }

    /// Update a position's mark price and refresh the unrealized component
    /// of the daily P&L.
    fn mark_price(&self, symbol: &str, price: Decimal) {
        let today = Local::now().date_naive();
        let mut positions = lock(&self.positions);
        if let Some(position) = positions.get_mut(symbol) {
            position.update_price(price);
        }
        let unrealized: Decimal = positions.values().map(|p| p.unrealized_pnl).sum();
        drop(positions);
        lock(&self.daily_pnl).set_unrealized(today, unrealized);
    }
}

/// Handle one inbound price tick: bookkeeping plus exit monitoring. Runs on
/// the subscription's dispatch task; any resulting order is spawned onto its
/// own task so delivery to other consumers is never stalled.
fn handle_price_tick(
    state: &Arc<SessionState>,
    gate: &Arc<RiskGate>,
    gateway: &Arc<RestGateway>,
    exits_in_flight: &Arc<Mutex<HashSet<String>>>,
    symbol: &str,
    price: Decimal,
) {
    state.mark_price(symbol, price);

    let exit = {
        let positions = lock(&state.positions);
        positions.get(symbol).and_then(|position| {
            gate.check_exit(position, price).map(|reason| {
                let side = if position.is_long() {
                    Side::Sell
                } else {
                    Side::Buy
                };
                (reason, side, position.quantity.abs())
            })
        })
    };

    let Some((reason, side, quantity)) = exit else {
        return;
    };

    // One exit order per symbol at a time
    if !lock(exits_in_flight).insert(symbol.to_string()) {
        return;
    }

    info!(symbol, %reason, "Exit triggered by price monitoring");

    let state = state.clone();
    let gateway = gateway.clone();
    let exits_in_flight = exits_in_flight.clone();
    let symbol = symbol.to_string();
    tokio::spawn(async move {
        let order = OrderRequest::market(symbol.clone(), side, quantity);
        match gateway.place_order(&order).await {
            Ok(result) => {
                info!(symbol = %symbol, order_id = %result.order_id, "Exit order placed");
                state.apply_fill(&symbol, side, quantity, price);
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "Exit order failed"),
        }
        lock(&exits_in_flight).remove(&symbol);
    });
}

/// One live trading session against the KIS OpenAPI.
pub struct TradingSession {
    tokens: Arc<TokenManager>,
    gateway: Arc<RestGateway>,
    stream: StreamChannel,
    gate: Arc<RiskGate>,
    state: Arc<SessionState>,
    strategies: Mutex<HashMap<String, Box<dyn Strategy>>>,
    exits_in_flight: Arc<Mutex<HashSet<String>>>,
    shutdown: watch::Sender<bool>,
}

impl TradingSession {
    /// Build a session from already-resolved credentials.
    pub fn new(credentials: Credentials, config: SessionConfig) -> TradingResult<Self> {
        config.limits.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TradingError::Config(e.to_string()))?;

        let issuer = Arc::new(RestTokenIssuer::new(http.clone()));
        let tokens = Arc::new(TokenManager::new(credentials.clone(), issuer));

        let (shutdown, shutdown_rx) = watch::channel(false);

        let dispatcher = Arc::new(
            RateLimitedDispatcher::new(http, tokens.clone(), config.rate_limit_per_sec)
                .with_retry(
                    config.max_retries,
                    Duration::from_millis(500),
                    Duration::from_secs(10),
                )
                .with_shutdown(shutdown_rx),
        );

        let gateway = Arc::new(RestGateway::new(dispatcher, credentials)?);
        let stream = StreamChannel::new(tokens.clone(), config.stream);

        Ok(Self {
            tokens,
            gateway,
            stream,
            gate: Arc::new(RiskGate::new(config.limits)),
            state: Arc::new(SessionState::new()),
            strategies: Mutex::new(HashMap::new()),
            exits_in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        })
    }

    /// Obtain (or refresh) the session's access token.
    pub async fn authenticate(&self) -> TradingResult<()> {
        self.tokens.valid_token().await?;
        Ok(())
    }

    /// Account balance; also refreshes the cached portfolio value the risk
    /// gate sizes against.
    pub async fn get_balance(&self) -> TradingResult<Balance> {
        let balance = self.gateway.get_balance().await?;
        *lock(&self.state.portfolio_value) = balance.total_evaluation;
        Ok(balance)
    }

    /// Current holdings.
    pub async fn get_holdings(&self) -> TradingResult<Vec<Holding>> {
        self.gateway.get_holdings().await
    }

    /// Current price for a symbol.
    pub async fn get_current_price(&self, symbol: &str) -> TradingResult<PriceQuote> {
        self.gateway.get_current_price(symbol).await
    }

    /// Order history for a date range (YYYYMMDD inclusive).
    pub async fn get_order_history(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> TradingResult<Vec<OrderHistoryEntry>> {
        self.gateway.get_order_history(start_date, end_date).await
    }

    /// Cancel an order.
    pub async fn cancel_order(&self, order_id: &str) -> TradingResult<OrderResult> {
        self.gateway.cancel_order(order_id).await
    }

    /// Modify an order's quantity and price.
    pub async fn modify_order(
        &self,
        order_id: &str,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> TradingResult<OrderResult> {
        self.gateway.modify_order(order_id, quantity, price).await
    }

    /// Cached portfolio value, fetched from the balance inquiry on first use.
    async fn portfolio_value(&self) -> TradingResult<Decimal> {
        let cached = *lock(&self.state.portfolio_value);
        if cached > Decimal::ZERO {
            return Ok(cached);
        }
        let balance = self.get_balance().await?;
        Ok(balance.total_evaluation)
    }

    /// Place an order through the risk gate. A rejection is terminal for
    /// this order; the caller may submit a revised one.
    pub async fn place_order(&self, request: OrderRequest) -> TradingResult<OrderResult> {
        let daily_pnl = lock(&self.state.daily_pnl).total();
        let position = {
            let positions = lock(&self.state.positions);
            positions
                .get(&request.symbol)
                .cloned()
                .unwrap_or_else(|| Position::flat(&request.symbol))
        };

        // Limit orders are sized against their own price; market orders
        // need a quote for sizing and local fill tracking.
        let reference_price = match (request.order_type, request.limit_price) {
            (OrderType::Limit, Some(price)) => price,
            _ => self.gateway.get_current_price(&request.symbol).await?.price,
        };

        let portfolio_value = self.portfolio_value().await?;

        let decision = self.gate.evaluate(
            &request,
            &position,
            portfolio_value,
            daily_pnl,
            reference_price,
        );

        let order = match decision {
            RiskDecision::Approved { order } => order,
            RiskDecision::Resized { order, reason } => {
                info!(symbol = %order.symbol, %reason, "Order resized by risk gate");
                order
            }
            RiskDecision::Rejected { reason } => {
                return Err(TradingError::RiskRejected { reason });
            }
        };

        let result = self.gateway.place_order(&order).await?;

        // Market orders are assumed filled at the reference price; execution
        // notices refine this via record_fill.
        if order.order_type == OrderType::Market {
            self.state
                .apply_fill(&order.symbol, order.side, order.quantity, reference_price);
        }

        Ok(result)
    }

    /// Record a confirmed fill (e.g. from an execution notice). Partial
    /// fills update the position immediately; the accepted remainder is not
    /// re-gated.
    pub fn record_fill(&self, symbol: &str, side: Side, quantity: Decimal, price: Decimal) {
        self.state.apply_fill(symbol, side, quantity, price);
    }

    /// Tracked position for a symbol.
    pub fn position(&self, symbol: &str) -> Option<Position> {
        lock(&self.state.positions).get(symbol).cloned()
    }

    /// Daily P&L (realized + unrealized) since day start.
    pub fn daily_pnl(&self) -> Decimal {
        lock(&self.state.daily_pnl).total()
    }

    /// Connect the stream channel.
    pub async fn connect_stream(&self) -> TradingResult<()> {
        self.stream.connect().await
    }

    /// Subscribe to real-time prices. Each tick updates the tracked
    /// position and daily P&L and is checked against the stop-loss /
    /// take-profit thresholds before the caller's callback runs; triggered
    /// exits are dispatched on their own task.
    pub async fn subscribe_price(
        &self,
        symbols: &[String],
        callback: StreamCallback,
    ) -> TradingResult<()> {
        for symbol in symbols {
            let state = self.state.clone();
            let gate = self.gate.clone();
            let gateway = self.gateway.clone();
            let exits_in_flight = self.exits_in_flight.clone();
            let user_callback = callback.clone();

            let wrapped: StreamCallback = Arc::new(move |event| {
                if let StreamEvent::Price(tick) = &event {
                    handle_price_tick(
                        &state,
                        &gate,
                        &gateway,
                        &exits_in_flight,
                        &tick.symbol,
                        tick.price,
                    );
                }
                user_callback(event);
            });

            self.stream
                .subscribe(symbol, ChannelKind::Price, wrapped)?;
        }
        Ok(())
    }

    /// Drop the price subscription for a symbol. Unknown symbols are a
    /// no-op.
    pub fn unsubscribe(&self, symbol: &str) {
        self.stream.unsubscribe(symbol, ChannelKind::Price);
    }

    /// Install a strategy instance for a symbol, replacing any existing one.
    pub fn register_strategy(&self, strategy: Box<dyn Strategy>) {
        let symbol = strategy.symbol().to_string();
        debug!(symbol = %symbol, strategy = strategy.name(), "Strategy registered");
        lock(&self.strategies).insert(symbol, strategy);
    }

    /// Poll the current price and feed it to the symbol's strategy. A
    /// symbol without a registered strategy gets the default moving-average
    /// crossover.
    pub async fn evaluate_strategy(&self, symbol: &str) -> TradingResult<StrategySignal> {
        let quote = self.gateway.get_current_price(symbol).await?;
        let price = quote.price.to_f64().unwrap_or(0.0);

        let mut strategies = lock(&self.strategies);
        if !strategies.contains_key(symbol) {
            let strategy = MaCrossoverStrategy::new(MaCrossoverConfig::new(symbol))?;
            strategies.insert(symbol.to_string(), Box::new(strategy));
        }
        match strategies.get_mut(symbol) {
            Some(strategy) => Ok(strategy.evaluate(price)),
            None => Err(TradingError::Config(format!(
                "no strategy registered for {symbol}"
            ))),
        }
    }

    /// Terminal shutdown: cancels suspended REST operations, tears down the
    /// stream and clears its subscription table.
    pub fn disconnect(&self) {
        info!("Trading session disconnecting");
        let _ = self.shutdown.send(true);
        self.stream.disconnect();
    }
}
