//! Rate-of-change momentum strategy.

use kis_core::traits::Strategy;
use kis_core::types::{SignalAction, SignalStrength, StrategySignal};
use kis_core::TradingError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Configuration for the momentum strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumConfig {
    /// Symbol this instance trades
    pub symbol: String,
    /// Lookback distance for the rate-of-change
    pub lookback: usize,
    /// Absolute rate-of-change required to signal (fraction, e.g. 0.02)
    pub threshold: f64,
}

impl MomentumConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            lookback: 10,
            threshold: 0.02,
        }
    }

    pub fn validate(&self) -> Result<(), TradingError> {
        if self.lookback == 0 {
            return Err(TradingError::Config(
                "lookback must be greater than 0".to_string(),
            ));
        }
        if self.threshold <= 0.0 {
            return Err(TradingError::Config(
                "threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Signals on the rate of change over a lookback window: buy when the price
/// has risen more than the threshold, sell when it has fallen more.
pub struct MomentumStrategy {
    config: MomentumConfig,
    history: VecDeque<f64>,
    last_signal: Option<SignalAction>,
}

impl MomentumStrategy {
    pub fn new(config: MomentumConfig) -> Result<Self, TradingError> {
        config.validate()?;
        let capacity = config.lookback + 1;
        Ok(Self {
            config,
            history: VecDeque::with_capacity(capacity),
            last_signal: None,
        })
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn evaluate(&mut self, price: f64) -> StrategySignal {
        self.history.push_back(price);
        if self.history.len() > self.config.lookback + 1 {
            self.history.pop_front();
        }

        if self.history.len() < self.config.lookback + 1 {
            return StrategySignal::hold(self.config.symbol.clone());
        }

        let oldest = self.history[0];
        if oldest == 0.0 {
            return StrategySignal::hold(self.config.symbol.clone());
        }
        let roc = (price - oldest) / oldest;

        let mut action = if roc >= self.config.threshold {
            Some(SignalAction::Buy)
        } else if roc <= -self.config.threshold {
            Some(SignalAction::Sell)
        } else {
            None
        };

        // A sustained move signals once, not on every tick
        if action == self.last_signal {
            action = None;
        } else {
            self.last_signal = action;
        }

        match action {
            Some(action) => {
                let ratio = (roc.abs() / self.config.threshold).min(3.0);
                let strength = if ratio >= 2.0 {
                    SignalStrength::Strong
                } else if ratio >= 1.5 {
                    SignalStrength::Moderate
                } else {
                    SignalStrength::Weak
                };
                StrategySignal {
                    symbol: self.config.symbol.clone(),
                    action,
                    strength,
                    confidence: (ratio / 3.0).min(1.0),
                    suggested_quantity: rust_decimal::Decimal::ZERO,
                }
            }
            None => StrategySignal::hold(self.config.symbol.clone()),
        }
    }

    fn reset(&mut self) {
        self.history.clear();
        self.last_signal = None;
    }

    fn warmup_period(&self) -> usize {
        self.config.lookback + 1
    }

    fn symbol(&self) -> &str {
        &self.config.symbol
    }

    fn is_warmed_up(&self) -> bool {
        self.history.len() >= self.warmup_period()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(lookback: usize, threshold: f64) -> MomentumStrategy {
        MomentumStrategy::new(MomentumConfig {
            symbol: "005930".to_string(),
            lookback,
            threshold,
        })
        .unwrap()
    }

    #[test]
    fn test_buy_on_rise_above_threshold() {
        let mut strategy = strategy(3, 0.05);

        for price in [100.0, 100.0, 100.0] {
            assert_eq!(strategy.evaluate(price).action, SignalAction::Hold);
        }
        // +10% over the lookback window
        assert_eq!(strategy.evaluate(110.0).action, SignalAction::Buy);
    }

    #[test]
    fn test_sustained_move_signals_once() {
        let mut strategy = strategy(3, 0.05);

        for price in [100.0, 100.0, 100.0] {
            strategy.evaluate(price);
        }
        assert_eq!(strategy.evaluate(110.0).action, SignalAction::Buy);
        // Still up more than 5% vs the window start, but already signalled
        assert_eq!(strategy.evaluate(111.0).action, SignalAction::Hold);
    }

    #[test]
    fn test_sell_on_drop() {
        let mut strategy = strategy(3, 0.05);
        for price in [100.0, 100.0, 100.0] {
            strategy.evaluate(price);
        }
        assert_eq!(strategy.evaluate(90.0).action, SignalAction::Sell);
    }

    #[test]
    fn test_config_validation() {
        assert!(MomentumConfig::new("005930").validate().is_ok());

        let bad = MomentumConfig {
            symbol: "005930".to_string(),
            lookback: 0,
            threshold: 0.02,
        };
        assert!(bad.validate().is_err());
    }
}
