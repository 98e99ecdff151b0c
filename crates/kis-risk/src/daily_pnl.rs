//! Daily P&L accumulator with day-boundary reset.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;

/// Realized plus unrealized P&L accumulated since day start. Mutated on
/// every fill and price update; crossing a day boundary resets it.
#[derive(Debug, Clone)]
pub struct DailyPnl {
    day: NaiveDate,
    realized: Decimal,
    unrealized: Decimal,
}

impl DailyPnl {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            realized: Decimal::ZERO,
            unrealized: Decimal::ZERO,
        }
    }

    /// Reset the accumulator if `today` is a new day.
    pub fn roll(&mut self, today: NaiveDate) {
        if today != self.day {
            info!(%today, realized = %self.realized, "Day boundary crossed, resetting daily P&L");
            self.day = today;
            self.realized = Decimal::ZERO;
            self.unrealized = Decimal::ZERO;
        }
    }

    /// Record realized P&L from a fill.
    pub fn add_realized(&mut self, today: NaiveDate, amount: Decimal) {
        self.roll(today);
        self.realized += amount;
    }

    /// Replace the unrealized component after a price update.
    pub fn set_unrealized(&mut self, today: NaiveDate, amount: Decimal) {
        self.roll(today);
        self.unrealized = amount;
    }

    pub fn realized(&self) -> Decimal {
        self.realized
    }

    /// Combined realized + unrealized P&L for the day.
    pub fn total(&self) -> Decimal {
        self.realized + self.unrealized
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, n).unwrap()
    }

    #[test]
    fn test_accumulates_within_day() {
        let mut pnl = DailyPnl::new(day(2));
        pnl.add_realized(day(2), dec!(-5000));
        pnl.add_realized(day(2), dec!(2000));
        pnl.set_unrealized(day(2), dec!(-1000));

        assert_eq!(pnl.realized(), dec!(-3000));
        assert_eq!(pnl.total(), dec!(-4000));
    }

    #[test]
    fn test_resets_at_day_boundary() {
        let mut pnl = DailyPnl::new(day(2));
        pnl.add_realized(day(2), dec!(-5000));
        pnl.set_unrealized(day(2), dec!(-2000));

        pnl.add_realized(day(3), dec!(100));
        assert_eq!(pnl.day(), day(3));
        assert_eq!(pnl.total(), dec!(100));
    }
}
