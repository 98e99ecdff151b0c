//! Risk management for the trading session.
//!
//! Every proposed order passes the [`RiskGate`] before it may reach the
//! network: daily-loss gating and position sizing for entries, privileged
//! pass-through for exits, plus stop-loss/take-profit exit monitoring.

mod daily_pnl;
mod gate;
mod limits;

pub use daily_pnl::DailyPnl;
pub use gate::{ExitReason, RiskDecision, RiskGate};
pub use limits::RiskLimits;
