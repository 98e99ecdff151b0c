//! The risk gate: every proposed order passes through here before it is
//! allowed to reach the network.

use kis_core::types::{OrderRequest, OrderType, Position, Side};
use kis_core::RejectReason;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::RiskLimits;

/// Decision from the risk gate.
#[derive(Debug, Clone)]
pub enum RiskDecision {
    /// Order approved as proposed
    Approved { order: OrderRequest },
    /// Order approved with the quantity shrunk to the sizing limit
    Resized { order: OrderRequest, reason: String },
    /// Order rejected; terminal for this order, the gate never retries
    Rejected { reason: RejectReason },
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            RiskDecision::Approved { .. } | RiskDecision::Resized { .. }
        )
    }

    pub fn order(&self) -> Option<&OrderRequest> {
        match self {
            RiskDecision::Approved { order } => Some(order),
            RiskDecision::Resized { order, .. } => Some(order),
            RiskDecision::Rejected { .. } => None,
        }
    }
}

/// Why an exit was triggered by monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop-loss"),
            ExitReason::TakeProfit => write!(f, "take-profit"),
        }
    }
}

/// Validates and adjusts proposed orders against position-sizing,
/// stop-loss/take-profit and daily-loss-limit rules.
pub struct RiskGate {
    limits: RiskLimits,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Whether the proposed order reduces existing exposure.
    fn is_exit(proposed: &OrderRequest, position: &Position) -> bool {
        (position.is_long() && proposed.side == Side::Sell)
            || (position.is_short() && proposed.side == Side::Buy)
    }

    /// Evaluate a proposed order.
    ///
    /// Rules are applied in order, first failure rejects:
    /// 1. entries are rejected outright once the daily loss limit is
    ///    breached;
    /// 2. an entry above the position-sizing cap is shrunk to the maximum
    ///    permissible quantity, not rejected;
    /// 3. notional below the minimum order amount is rejected.
    ///
    /// Exits always pass: blocking an exit compounds risk, so neither the
    /// loss limit nor sizing applies to them.
    pub fn evaluate(
        &self,
        proposed: &OrderRequest,
        position: &Position,
        portfolio_value: Decimal,
        daily_pnl: Decimal,
        reference_price: Decimal,
    ) -> RiskDecision {
        if Self::is_exit(proposed, position) {
            debug!(symbol = %proposed.symbol, "Exit order, approved without entry checks");
            return RiskDecision::Approved {
                order: proposed.clone(),
            };
        }

        // Rule 1: daily loss limit gates all new entries
        let loss_floor = self.limits.max_daily_loss_pct * portfolio_value;
        if daily_pnl <= loss_floor {
            warn!(
                daily_pnl = %daily_pnl,
                floor = %loss_floor,
                "Daily loss limit breached, rejecting entry"
            );
            return RiskDecision::Rejected {
                reason: RejectReason::DailyLossLimitReached,
            };
        }

        let per_share = match proposed.order_type {
            OrderType::Limit => proposed.limit_price.unwrap_or(reference_price),
            OrderType::Market => reference_price,
        };
        if per_share <= Decimal::ZERO || proposed.quantity <= Decimal::ZERO {
            return RiskDecision::Rejected {
                reason: RejectReason::ZeroQuantity,
            };
        }

        // Rule 2: shrink oversized entries to the cap instead of blocking
        let max_notional = self.limits.max_position_size_pct * portfolio_value;
        let mut quantity = proposed.quantity;
        let mut resized = false;
        if quantity * per_share > max_notional {
            quantity = (max_notional / per_share).floor();
            resized = true;
            if quantity <= Decimal::ZERO {
                return RiskDecision::Rejected {
                    reason: RejectReason::ZeroQuantity,
                };
            }
        }

        // Rule 3: minimum order amount
        if quantity * per_share < self.limits.min_order_amount {
            return RiskDecision::Rejected {
                reason: RejectReason::BelowMinimumOrder,
            };
        }

        if resized {
            let mut order = proposed.clone();
            order.quantity = quantity;
            debug!(
                symbol = %order.symbol,
                from = %proposed.quantity,
                to = %quantity,
                "Entry resized to position cap"
            );
            RiskDecision::Resized {
                order,
                reason: format!(
                    "notional capped at {:.0} ({}% of portfolio)",
                    max_notional,
                    self.limits.max_position_size_pct * Decimal::ONE_HUNDRED
                ),
            }
        } else {
            RiskDecision::Approved {
                order: proposed.clone(),
            }
        }
    }

    /// Background exit monitoring: compare the current price against the
    /// position's average cost. Returned exits always pass the gate.
    pub fn check_exit(&self, position: &Position, current_price: Decimal) -> Option<ExitReason> {
        let return_pct = position.return_pct(current_price)?;

        if return_pct <= self.limits.stop_loss_pct {
            Some(ExitReason::StopLoss)
        } else if return_pct >= self.limits.take_profit_pct {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }
}
