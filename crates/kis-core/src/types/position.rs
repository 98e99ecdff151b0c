//! Position tracking.

use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// A position in a single security. Mutated by confirmed fills, read by the
/// risk gate for sizing decisions. Not persisted beyond the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Symbol
    pub symbol: String,
    /// Number of shares (positive for long, negative for short)
    pub quantity: Decimal,
    /// Average cost per share
    pub average_cost: Decimal,
    /// Last observed market price
    pub current_price: Decimal,
    /// Unrealized profit/loss at the current price
    pub unrealized_pnl: Decimal,
}

impl Position {
    /// Create a new position.
    pub fn new(symbol: impl Into<String>, quantity: Decimal, average_cost: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            average_cost,
            current_price: average_cost,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    /// An empty position for a symbol.
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self::new(symbol, Decimal::ZERO, Decimal::ZERO)
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == Decimal::ZERO
    }

    /// Notional value at the current price.
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    /// Update the current market price and recompute unrealized P&L.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = self.quantity * (price - self.average_cost);
    }

    /// Return percentage relative to average cost, signed for direction.
    /// `None` for a flat position or zero cost.
    pub fn return_pct(&self, price: Decimal) -> Option<Decimal> {
        if self.is_flat() || self.average_cost == Decimal::ZERO {
            return None;
        }
        let pct = (price - self.average_cost) / self.average_cost;
        Some(if self.is_long() { pct } else { -pct })
    }

    /// Apply a confirmed fill. Returns the realized P&L on any closed
    /// portion.
    pub fn apply_fill(&mut self, side: Side, quantity: Decimal, price: Decimal) -> Decimal {
        let fill_qty = quantity * side.sign();
        let mut realized = Decimal::ZERO;

        let same_direction = (self.quantity > Decimal::ZERO && fill_qty > Decimal::ZERO)
            || (self.quantity < Decimal::ZERO && fill_qty < Decimal::ZERO);

        if same_direction || self.quantity == Decimal::ZERO {
            // Adding to the position - blend the average cost
            let total_cost = self.quantity * self.average_cost + fill_qty * price;
            let new_quantity = self.quantity + fill_qty;
            if new_quantity != Decimal::ZERO {
                self.average_cost = total_cost / new_quantity;
            }
            self.quantity = new_quantity;
        } else {
            // Reducing or reversing
            let close_qty = fill_qty.abs().min(self.quantity.abs());
            realized = if self.quantity > Decimal::ZERO {
                close_qty * (price - self.average_cost)
            } else {
                close_qty * (self.average_cost - price)
            };

            let remaining = fill_qty.abs() - close_qty;
            if remaining > Decimal::ZERO {
                // Position reversed
                self.quantity = fill_qty.signum() * remaining;
                self.average_cost = price;
            } else {
                self.quantity += fill_qty;
                if self.quantity == Decimal::ZERO {
                    self.average_cost = Decimal::ZERO;
                }
            }
        }

        self.update_price(price);
        realized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_long_pnl() {
        let mut position = Position::new("005930", dec!(10), dec!(70000));
        position.update_price(dec!(71000));
        assert_eq!(position.unrealized_pnl, dec!(10000));
        assert_eq!(position.market_value(), dec!(710000));
    }

    #[test]
    fn test_apply_fill_blends_cost() {
        let mut position = Position::new("005930", dec!(10), dec!(70000));
        let realized = position.apply_fill(Side::Buy, dec!(10), dec!(72000));
        assert_eq!(realized, Decimal::ZERO);
        assert_eq!(position.quantity, dec!(20));
        assert_eq!(position.average_cost, dec!(71000));
    }

    #[test]
    fn test_apply_fill_realizes_on_close() {
        let mut position = Position::new("005930", dec!(10), dec!(70000));
        let realized = position.apply_fill(Side::Sell, dec!(10), dec!(73000));
        assert_eq!(realized, dec!(30000));
        assert!(position.is_flat());
        assert_eq!(position.average_cost, Decimal::ZERO);
    }

    #[test]
    fn test_return_pct() {
        let position = Position::new("005930", dec!(10), dec!(100));
        assert_eq!(position.return_pct(dec!(95)), Some(dec!(-0.05)));
        assert_eq!(position.return_pct(dec!(110)), Some(dec!(0.1)));

        let flat = Position::flat("005930");
        assert_eq!(flat.return_pct(dec!(100)), None);
    }
}
