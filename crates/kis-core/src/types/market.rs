//! Real-time market data types carried over the stream channel.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of real-time channel a subscription is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Real-time trade price
    Price,
    /// Real-time orderbook (top 10 levels)
    Orderbook,
    /// Execution notices for own orders
    Execution,
}

impl ChannelKind {
    /// KIS transaction ID for the channel.
    pub fn tr_id(&self) -> &'static str {
        match self {
            ChannelKind::Price => "H0STCNT0",
            ChannelKind::Orderbook => "H0STASP0",
            ChannelKind::Execution => "H0STCNI0",
        }
    }

    /// Reverse lookup from a frame's tr_id.
    pub fn from_tr_id(tr_id: &str) -> Option<Self> {
        match tr_id {
            "H0STCNT0" => Some(ChannelKind::Price),
            "H0STASP0" => Some(ChannelKind::Orderbook),
            "H0STCNI0" => Some(ChannelKind::Execution),
            _ => None,
        }
    }
}

/// A real-time trade price tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: Decimal,
    pub change: Decimal,
    pub change_rate: f64,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
}

/// A real-time orderbook snapshot (top 10 levels each side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub symbol: String,
    pub bid_prices: Vec<Decimal>,
    pub bid_volumes: Vec<u64>,
    pub ask_prices: Vec<Decimal>,
    pub ask_volumes: Vec<u64>,
    pub timestamp: DateTime<Utc>,
}

/// An execution notice for one of our own orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionNotice {
    pub symbol: String,
    pub order_id: String,
    pub filled_quantity: Decimal,
    pub fill_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Event delivered to a subscription callback.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Price(PriceTick),
    Orderbook(OrderbookSnapshot),
    Execution(ExecutionNotice),
    /// Terminal notification: reconnection attempts are exhausted and the
    /// channel is down for good. Consumers should fail over to polling.
    StreamLost,
}

impl StreamEvent {
    /// Symbol the event refers to, if any.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            StreamEvent::Price(t) => Some(&t.symbol),
            StreamEvent::Orderbook(o) => Some(&o.symbol),
            StreamEvent::Execution(e) => Some(&e.symbol),
            StreamEvent::StreamLost => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tr_id_round_trip() {
        for kind in [
            ChannelKind::Price,
            ChannelKind::Orderbook,
            ChannelKind::Execution,
        ] {
            assert_eq!(ChannelKind::from_tr_id(kind.tr_id()), Some(kind));
        }
        assert_eq!(ChannelKind::from_tr_id("H0UNKNOWN"), None);
    }
}
