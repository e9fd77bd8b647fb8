//! Pre-trade risk checks

use crate::config::RiskLimits;
use crate::portfolio::AccountSnapshot;
use common::{Decimal, TradeIntent};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a trade intent was refused
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRejection {
    #[error("MAX_POSITIONS: {open} open positions, limit {limit}")]
    MaxPositions { open: usize, limit: usize },

    #[error("DAILY_LOSS_LIMIT: size ${size:.2} exceeds remaining daily budget ${remaining:.2}")]
    DailyLossLimit { size: Decimal, remaining: Decimal },

    #[error("DRAWDOWN_LIMIT: drawdown {drawdown:.4} reached limit {limit:.4}")]
    DrawdownLimit { drawdown: f64, limit: f64 },

    #[error("DUPLICATE_POSITION: {instrument} already has an open position")]
    DuplicatePosition { instrument: String },
}

impl RiskRejection {
    /// Enumerated reason code
    pub fn code(&self) -> &'static str {
        match self {
            RiskRejection::MaxPositions { .. } => "MAX_POSITIONS",
            RiskRejection::DailyLossLimit { .. } => "DAILY_LOSS_LIMIT",
            RiskRejection::DrawdownLimit { .. } => "DRAWDOWN_LIMIT",
            RiskRejection::DuplicatePosition { .. } => "DUPLICATE_POSITION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub reason: Option<RiskRejection>,
    pub snapshot: AccountSnapshot,
}

impl RiskDecision {
    pub fn into_result(self) -> Result<AccountSnapshot, RiskRejection> {
        match self.reason {
            Some(reason) => Err(reason),
            None => Ok(self.snapshot),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskEngine {
    limits: RiskLimits,
}

impl RiskEngine {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Approve or reject a trade against the account state. Checks run in a
    /// fixed order and the first failure is reported.
    pub fn approve(&self, candidate: &TradeIntent, account: &AccountSnapshot) -> RiskDecision {
        let reason = self.check(candidate, account).err();
        match &reason {
            Some(rejection) => warn!(
                instrument = %candidate.instrument,
                reason = rejection.code(),
                detail = %rejection,
                "Trade rejected by risk engine"
            ),
            None => debug!(
                instrument = %candidate.instrument,
                open_positions = account.open_positions,
                daily_pnl = %account.daily_realized_pnl,
                drawdown = account.drawdown,
                "Trade approved by risk engine"
            ),
        }
        RiskDecision {
            approved: reason.is_none(),
            reason,
            snapshot: account.clone(),
        }
    }

    fn check(&self, candidate: &TradeIntent, account: &AccountSnapshot) -> Result<(), RiskRejection> {
        if account.open_positions >= self.limits.max_positions {
            return Err(RiskRejection::MaxPositions {
                open: account.open_positions,
                limit: self.limits.max_positions,
            });
        }

        // Losses are negative P&L, so they eat into the limit
        let remaining = (self.limits.daily_loss_limit + account.daily_realized_pnl).max(Decimal::ZERO);
        if candidate.size_usd > remaining {
            return Err(RiskRejection::DailyLossLimit {
                size: candidate.size_usd,
                remaining,
            });
        }

        if account.drawdown >= self.limits.max_drawdown_pct {
            return Err(RiskRejection::DrawdownLimit {
                drawdown: account.drawdown,
                limit: self.limits.max_drawdown_pct,
            });
        }

        if account.has_open(&candidate.instrument) {
            return Err(RiskRejection::DuplicatePosition {
                instrument: candidate.instrument.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::{TradeDirection, Uuid};
    use rust_decimal_macros::dec;

    fn intent(instrument: &str) -> TradeIntent {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 13, 0).unwrap();
        TradeIntent {
            trade_id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            interval_start: now,
            direction: TradeDirection::BuyYes,
            size_usd: dec!(1.00),
            reference_price: 0.65,
            created_at: now,
        }
    }

    fn account() -> AccountSnapshot {
        AccountSnapshot {
            open_positions: 0,
            open_instruments: Vec::new(),
            daily_realized_pnl: Decimal::ZERO,
            balance: dec!(1000),
            high_water_mark: dec!(1000),
            drawdown: 0.0,
            taken_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 13, 0).unwrap(),
        }
    }

    #[test]
    fn test_clean_account_is_approved() {
        let decision = RiskEngine::new(RiskLimits::default()).approve(&intent("m"), &account());
        assert!(decision.approved);
        assert_eq!(decision.reason, None);
        assert_eq!(decision.snapshot, account());
    }

    #[test]
    fn test_max_positions() {
        let mut state = account();
        state.open_positions = 5;
        let decision = RiskEngine::new(RiskLimits::default()).approve(&intent("m"), &state);
        assert!(!decision.approved);
        assert_eq!(decision.reason.unwrap().code(), "MAX_POSITIONS");
    }

    #[test]
    fn test_daily_loss_budget() {
        let engine = RiskEngine::new(RiskLimits::default());

        let mut state = account();
        state.daily_realized_pnl = dec!(-4.00);
        assert!(engine.approve(&intent("m"), &state).approved);

        state.daily_realized_pnl = dec!(-4.50);
        let decision = engine.approve(&intent("m"), &state);
        assert_eq!(
            decision.reason,
            Some(RiskRejection::DailyLossLimit {
                size: dec!(1.00),
                remaining: dec!(0.50),
            })
        );
    }

    #[test]
    fn test_drawdown_limit_is_inclusive() {
        let engine = RiskEngine::new(RiskLimits::default());
        let mut state = account();
        state.drawdown = 0.1499;
        assert!(engine.approve(&intent("m"), &state).approved);

        state.drawdown = 0.15;
        let rejection = engine.approve(&intent("m"), &state).into_result().unwrap_err();
        assert_eq!(rejection.code(), "DRAWDOWN_LIMIT");
    }

    #[test]
    fn test_duplicate_position() {
        let mut state = account();
        state.open_positions = 1;
        state.open_instruments = vec!["btc-updown-15m-1".to_string()];
        let engine = RiskEngine::new(RiskLimits::default());

        let rejection = engine.approve(&intent("btc-updown-15m-1"), &state).reason.unwrap();
        assert_eq!(rejection.code(), "DUPLICATE_POSITION");
        assert!(engine.approve(&intent("btc-updown-15m-2"), &state).approved);
    }

    #[test]
    fn test_first_failing_check_is_reported() {
        let mut state = account();
        state.open_positions = 5;
        state.daily_realized_pnl = dec!(-10);
        state.drawdown = 0.5;
        let rejection = RiskEngine::new(RiskLimits::default())
            .approve(&intent("m"), &state)
            .reason
            .unwrap();
        assert_eq!(rejection.code(), "MAX_POSITIONS");
        assert!(rejection.to_string().starts_with("MAX_POSITIONS"));
    }
}
