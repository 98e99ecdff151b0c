//! Moving average crossover strategy.
//!
//! Emits a buy signal when the short average crosses above the long
//! average, a sell signal on the inverse crossover, and hold otherwise.

use kis_core::traits::Strategy;
use kis_core::types::{SignalAction, SignalStrength, StrategySignal};
use kis_core::TradingError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Configuration for the MA crossover strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaCrossoverConfig {
    /// Symbol this instance trades
    pub symbol: String,
    /// Short moving-average window
    pub short_window: usize,
    /// Long moving-average window
    pub long_window: usize,
}

impl MaCrossoverConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            short_window: 5,
            long_window: 20,
        }
    }

    pub fn validate(&self) -> Result<(), TradingError> {
        if self.short_window == 0 {
            return Err(TradingError::Config(
                "short window must be greater than 0".to_string(),
            ));
        }
        if self.short_window >= self.long_window {
            return Err(TradingError::Config(
                "short window must be less than long window".to_string(),
            ));
        }
        Ok(())
    }
}

/// Moving average crossover over two rolling windows of closing prices.
/// State persists across evaluations and is reset only explicitly.
pub struct MaCrossoverStrategy {
    config: MaCrossoverConfig,
    history: VecDeque<f64>,
    max_history: usize,
    last_signal: Option<SignalAction>,
}

impl MaCrossoverStrategy {
    pub fn new(config: MaCrossoverConfig) -> Result<Self, TradingError> {
        config.validate()?;
        let max_history = config.long_window + 10;
        Ok(Self {
            config,
            history: VecDeque::with_capacity(max_history + 1),
            max_history,
            last_signal: None,
        })
    }

    fn mean_of_last(&self, window: usize, skip: usize) -> f64 {
        let sum: f64 = self.history.iter().rev().skip(skip).take(window).sum();
        sum / window as f64
    }

    fn classify_strength(magnitude: f64) -> SignalStrength {
        if magnitude > 0.02 {
            SignalStrength::Strong
        } else if magnitude > 0.01 {
            SignalStrength::Moderate
        } else {
            SignalStrength::Weak
        }
    }
}

impl Strategy for MaCrossoverStrategy {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn evaluate(&mut self, price: f64) -> StrategySignal {
        self.history.push_back(price);
        if self.history.len() > self.max_history {
            self.history.pop_front();
        }

        // Crossover detection needs the previous averages too
        if self.history.len() < self.config.long_window + 1 {
            return StrategySignal::hold(self.config.symbol.clone());
        }

        let short = self.mean_of_last(self.config.short_window, 0);
        let long = self.mean_of_last(self.config.long_window, 0);
        let prev_short = self.mean_of_last(self.config.short_window, 1);
        let prev_long = self.mean_of_last(self.config.long_window, 1);

        let mut crossover = if prev_short <= prev_long && short > long {
            Some(SignalAction::Buy)
        } else if prev_short >= prev_long && short < long {
            Some(SignalAction::Sell)
        } else {
            None
        };

        // Suppress a repeat of the immediately preceding signal
        if crossover == self.last_signal {
            crossover = None;
        } else {
            self.last_signal = crossover;
        }

        match crossover {
            Some(action) => {
                let magnitude = if long != 0.0 {
                    ((short - long) / long).abs()
                } else {
                    0.0
                };
                tracing::debug!(
                    symbol = %self.config.symbol,
                    ?action,
                    short,
                    long,
                    "Crossover detected"
                );
                StrategySignal {
                    symbol: self.config.symbol.clone(),
                    action,
                    strength: Self::classify_strength(magnitude),
                    confidence: magnitude.min(1.0),
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
        self.config.long_window + 1
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

    fn strategy(short: usize, long: usize) -> MaCrossoverStrategy {
        MaCrossoverStrategy::new(MaCrossoverConfig {
            symbol: "005930".to_string(),
            short_window: short,
            long_window: long,
        })
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(MaCrossoverConfig::new("005930").validate().is_ok());

        let inverted = MaCrossoverConfig {
            symbol: "005930".to_string(),
            short_window: 20,
            long_window: 5,
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_buy_emitted_exactly_at_crossover_index() {
        // 25 flat prices, then a step up: with windows 5/20 the short
        // average crosses the long average exactly at index 25.
        let mut strategy = strategy(5, 20);

        let mut actions = Vec::new();
        for i in 0..30 {
            let price = if i < 25 { 100.0 } else { 110.0 };
            actions.push(strategy.evaluate(price).action);
        }

        // Insufficient history: indices 0..=19 hold
        assert!(actions[..20].iter().all(|&a| a == SignalAction::Hold));
        // Flat averages, no crossover: 20..=24 hold
        assert!(actions[20..25].iter().all(|&a| a == SignalAction::Hold));
        // The crossover fires once
        assert_eq!(actions[25], SignalAction::Buy);
        // No new crossover afterwards
        assert!(actions[26..].iter().all(|&a| a == SignalAction::Hold));
    }

    #[test]
    fn test_sell_on_inverse_crossover() {
        let mut strategy = strategy(2, 4);

        // Rise, then fall sharply: short average drops below long
        let prices = [100.0, 100.0, 100.0, 100.0, 120.0, 80.0, 60.0];
        let actions: Vec<SignalAction> =
            prices.iter().map(|&p| strategy.evaluate(p).action).collect();

        assert!(actions.contains(&SignalAction::Buy));
        assert!(actions.contains(&SignalAction::Sell));
    }

    #[test]
    fn test_insufficient_history_holds_never_errors() {
        let mut strategy = strategy(5, 20);
        for i in 0..20 {
            let signal = strategy.evaluate(100.0 + i as f64);
            assert_eq!(signal.action, SignalAction::Hold);
        }
        assert!(!strategy.is_warmed_up());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut strategy = strategy(2, 4);
        for i in 0..10 {
            strategy.evaluate(100.0 + i as f64);
        }
        assert!(strategy.is_warmed_up());

        strategy.reset();
        assert!(!strategy.is_warmed_up());
        assert_eq!(strategy.evaluate(100.0).action, SignalAction::Hold);
    }
}
