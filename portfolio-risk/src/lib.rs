//! Portfolio & Risk Management (Layer 3)
//!
//! Tracks open positions and realized P&L for the up/down strategy and
//! approves or rejects trade intents against position, daily-loss and
//! drawdown limits.

mod config;
mod portfolio;
mod risk;

pub use config::RiskLimits;
pub use portfolio::{AccountBook, AccountSnapshot, AccountState, Position};
pub use risk::{RiskDecision, RiskEngine, RiskRejection};

use chrono::{DateTime, Utc};
use common::{RiskSettings, TradeIntent, TradeOutcome};
use tracing::info;

/// Risk engine plus the account state it checks against.
///
/// Owned by the decision orchestrator, which is the only writer.
#[derive(Debug, Clone)]
pub struct RiskManager {
    engine: RiskEngine,
    book: AccountBook,
}

impl RiskManager {
    pub fn new(settings: &RiskSettings, now: DateTime<Utc>) -> Self {
        Self {
            engine: RiskEngine::new(RiskLimits::from(settings)),
            book: AccountBook::new(settings.starting_balance, settings.daily_reset_hour_utc, now),
        }
    }

    /// Evaluate a trade intent, applying the daily reset first if due.
    pub fn check_trade(&mut self, intent: &TradeIntent, now: DateTime<Utc>) -> RiskDecision {
        self.book.roll_day(now);
        let snapshot = self.book.snapshot(now);
        self.engine.approve(intent, &snapshot)
    }

    /// Record a filled intent as an open position
    pub fn record_fill(&mut self, intent: &TradeIntent, fill_price: f64, at: DateTime<Utc>) {
        self.book.open_position(intent, fill_price, at);
    }

    /// Close the position behind a settled outcome. Unfilled outcomes have
    /// no position and leave the book untouched.
    pub fn record_settlement(&mut self, outcome: &TradeOutcome, at: DateTime<Utc>) -> bool {
        if !outcome.is_settled() {
            return false;
        }
        let closed = self.book.close_position(outcome.trade_id, outcome.pnl, at);
        if closed {
            info!(
                trade_id = %outcome.trade_id,
                settlement = ?outcome.settlement,
                pnl = %outcome.pnl,
                "Risk state updated from settlement"
            );
        }
        closed
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> AccountSnapshot {
        self.book.snapshot(now)
    }

    pub fn book(&self) -> &AccountBook {
        &self.book
    }

    pub fn limits(&self) -> &RiskLimits {
        self.engine.limits()
    }
}
