//! Risk limit configuration.

use kis_core::TradingError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Immutable risk limits, consulted (never mutated) by the gate.
///
/// Percentages are fractions: `0.1` is 10% of portfolio value,
/// `-0.02` is a 2% loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum position size as a fraction of portfolio value
    pub max_position_size_pct: Decimal,
    /// Stop-loss threshold (negative return fraction)
    pub stop_loss_pct: Decimal,
    /// Take-profit threshold (positive return fraction)
    pub take_profit_pct: Decimal,
    /// Daily loss limit (negative return fraction)
    pub max_daily_loss_pct: Decimal,
    /// Minimum order notional (KRW)
    pub min_order_amount: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size_pct: dec!(0.1),
            stop_loss_pct: dec!(-0.05),
            take_profit_pct: dec!(0.10),
            max_daily_loss_pct: dec!(-0.02),
            min_order_amount: dec!(10000),
        }
    }
}

impl RiskLimits {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), TradingError> {
        if self.max_position_size_pct <= Decimal::ZERO || self.max_position_size_pct > Decimal::ONE
        {
            return Err(TradingError::Config(
                "max_position_size_pct must be in (0, 1]".to_string(),
            ));
        }
        if self.stop_loss_pct >= Decimal::ZERO {
            return Err(TradingError::Config(
                "stop_loss_pct must be negative".to_string(),
            ));
        }
        if self.take_profit_pct <= Decimal::ZERO {
            return Err(TradingError::Config(
                "take_profit_pct must be positive".to_string(),
            ));
        }
        if self.max_daily_loss_pct >= Decimal::ZERO {
            return Err(TradingError::Config(
                "max_daily_loss_pct must be negative".to_string(),
            ));
        }
        if self.min_order_amount < Decimal::ZERO {
            return Err(TradingError::Config(
                "min_order_amount must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
