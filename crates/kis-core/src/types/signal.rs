//! Strategy signal types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Action suggested by a strategy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// Coarse strength classification for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStrength {
    Weak,
    Moderate,
    Strong,
}

/// Output of one strategy evaluation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySignal {
    /// Symbol the signal applies to
    pub symbol: String,
    /// Suggested action
    pub action: SignalAction,
    /// Strength classification
    pub strength: SignalStrength,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Suggested quantity; zero leaves sizing to the risk gate
    pub suggested_quantity: Decimal,
}

impl StrategySignal {
    /// A hold signal (no action).
    pub fn hold(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            action: SignalAction::Hold,
            strength: SignalStrength::Weak,
            confidence: 0.0,
            suggested_quantity: Decimal::ZERO,
        }
    }

    pub fn is_hold(&self) -> bool {
        self.action == SignalAction::Hold
    }
}
