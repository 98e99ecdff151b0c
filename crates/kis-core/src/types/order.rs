//! Order types and structures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Get the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Sign for position calculations (+1 for buy, -1 for sell).
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Market order - execute immediately at best available price
    Market,
    /// Limit order - execute at specified price or better
    Limit,
}

impl OrderType {
    /// KIS order division code (ORD_DVSN).
    pub fn division_code(&self) -> &'static str {
        match self {
            OrderType::Market => "01",
            OrderType::Limit => "00",
        }
    }
}

/// Order status as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order accepted, not yet filled
    Accepted,
    /// Order partially filled
    PartiallyFilled,
    /// Order completely filled
    Filled,
    /// Order canceled
    Canceled,
    /// Order rejected
    Rejected,
}

impl OrderStatus {
    /// Check if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }
}

/// Order request for submitting new orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Symbol to trade (6-digit issue code)
    pub symbol: String,
    /// Buy or sell
    pub side: Side,
    /// Type of order
    pub order_type: OrderType,
    /// Quantity to trade
    pub quantity: Decimal,
    /// Limit price (required for limit orders)
    pub limit_price: Option<Decimal>,
    /// Client-provided order ID
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// Create a market order request.
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            client_order_id: None,
        }
    }

    /// Create a limit order request.
    pub fn limit(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(limit_price),
            client_order_id: None,
        }
    }

    /// Set a client order ID.
    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    /// Generate a client order ID if none was provided.
    pub fn client_order_id_or_new(&self) -> String {
        self.client_order_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// Notional value of the order at the given reference price.
    pub fn notional(&self, reference_price: Decimal) -> Decimal {
        let price = match self.order_type {
            OrderType::Limit => self.limit_price.unwrap_or(reference_price),
            OrderType::Market => reference_price,
        };
        self.quantity * price
    }
}

/// Result of a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    /// Broker-assigned order number (ODNO)
    pub order_id: String,
    /// Current status
    pub status: OrderStatus,
    /// Quantity filled so far
    pub filled_quantity: Decimal,
    /// Average fill price, if any fills occurred
    pub average_fill_price: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_request_market() {
        let request = OrderRequest::market("005930", Side::Buy, dec!(10));
        assert_eq!(request.symbol, "005930");
        assert_eq!(request.order_type, OrderType::Market);
        assert!(request.limit_price.is_none());
    }

    #[test]
    fn test_order_request_limit() {
        let request = OrderRequest::limit("005930", Side::Sell, dec!(5), dec!(71000));
        assert_eq!(request.order_type, OrderType::Limit);
        assert_eq!(request.limit_price, Some(dec!(71000)));
    }

    #[test]
    fn test_notional_uses_limit_price() {
        let limit = OrderRequest::limit("005930", Side::Buy, dec!(10), dec!(70000));
        assert_eq!(limit.notional(dec!(69000)), dec!(700000));

        let market = OrderRequest::market("005930", Side::Buy, dec!(10));
        assert_eq!(market.notional(dec!(69000)), dec!(690000));
    }

    #[test]
    fn test_division_codes() {
        assert_eq!(OrderType::Market.division_code(), "01");
        assert_eq!(OrderType::Limit.division_code(), "00");
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
