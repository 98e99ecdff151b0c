//! Core data types for the trading session.

mod credentials;
mod market;
mod order;
mod position;
mod signal;

pub use credentials::{AccessToken, Credentials, Environment};
pub use market::{
    ChannelKind, ExecutionNotice, OrderbookSnapshot, PriceTick, StreamEvent,
};
pub use order::{OrderRequest, OrderResult, OrderStatus, OrderType, Side};
pub use position::Position;
pub use signal::{SignalAction, SignalStrength, StrategySignal};
