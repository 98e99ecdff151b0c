//! Strategy trait definition.

use crate::types::StrategySignal;

/// Core strategy trait.
///
/// A strategy instance owns the rolling state for a single symbol. It is fed
/// one closing price per evaluation cycle (from a stream tick or a poll) and
/// emits a signal. Insufficient history yields `Hold`, never an error.
pub trait Strategy: Send {
    /// Unique name of this strategy.
    fn name(&self) -> &str;

    /// Feed the next observed price and produce a signal.
    fn evaluate(&mut self, price: f64) -> StrategySignal;

    /// Reset all rolling state.
    fn reset(&mut self);

    /// Number of prices needed before a non-hold signal can be emitted.
    fn warmup_period(&self) -> usize;

    /// Symbol this instance trades.
    fn symbol(&self) -> &str;

    /// Whether enough history has been seen.
    fn is_warmed_up(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StrategySignal;

    struct CountingStrategy {
        symbol: String,
        seen: usize,
        warmup: usize,
    }

    impl Strategy for CountingStrategy {
        fn name(&self) -> &str {
            "counting"
        }

        fn evaluate(&mut self, _price: f64) -> StrategySignal {
            self.seen += 1;
            StrategySignal::hold(self.symbol.clone())
        }

        fn reset(&mut self) {
            self.seen = 0;
        }

        fn warmup_period(&self) -> usize {
            self.warmup
        }

        fn symbol(&self) -> &str {
            &self.symbol
        }

        fn is_warmed_up(&self) -> bool {
            self.seen >= self.warmup
        }
    }

    #[test]
    fn test_warmup_tracking() {
        let mut strategy = CountingStrategy {
            symbol: "005930".to_string(),
            seen: 0,
            warmup: 3,
        };

        for _ in 0..2 {
            strategy.evaluate(100.0);
        }
        assert!(!strategy.is_warmed_up());

        strategy.evaluate(100.0);
        assert!(strategy.is_warmed_up());

        strategy.reset();
        assert!(!strategy.is_warmed_up());
    }
}
