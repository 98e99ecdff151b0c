//! Caller-facing trading session for the KIS OpenAPI.
//!
//! [`TradingSession`] wires the token manager, rate-limited dispatcher,
//! REST gateway, stream channel, risk gate and strategies into one
//! risk-gated surface: `authenticate`, `place_order`, `get_balance`,
//! `get_current_price`, `subscribe_price`, `unsubscribe`, `disconnect`,
//! `evaluate_strategy`.

mod session;

pub use session::{SessionConfig, TradingSession};
