//! Account book: open positions, realized P&L and the drawdown reference

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{Decimal, TradeDirection, TradeIntent, Uuid};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A filled trade awaiting settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: Uuid,
    pub instrument: String,
    pub direction: TradeDirection,
    pub size_usd: Decimal,
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
}

/// Point-in-time view of the account used for risk checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub open_positions: usize,
    pub open_instruments: Vec<String>,
    pub daily_realized_pnl: Decimal,
    pub balance: Decimal,
    pub high_water_mark: Decimal,
    /// Fractional decline of the balance from the high-water mark
    pub drawdown: f64,
    pub taken_at: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn has_open(&self, instrument: &str) -> bool {
        self.open_instruments.iter().any(|i| i == instrument)
    }
}

/// Source of account state for the risk engine.
pub trait AccountState {
    fn snapshot(&self, now: DateTime<Utc>) -> AccountSnapshot;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBook {
    positions: BTreeMap<Uuid, Position>,
    balance: Decimal,
    daily_realized_pnl: Decimal,
    total_realized_pnl: Decimal,
    high_water_mark: Decimal,
    reset_hour_utc: u32,
    last_reset: DateTime<Utc>,
}

impl AccountBook {
    pub fn new(starting_balance: Decimal, reset_hour_utc: u32, now: DateTime<Utc>) -> Self {
        Self {
            positions: BTreeMap::new(),
            balance: starting_balance,
            daily_realized_pnl: Decimal::ZERO,
            total_realized_pnl: Decimal::ZERO,
            high_water_mark: starting_balance,
            reset_hour_utc: reset_hour_utc.min(23),
            last_reset: now,
        }
    }

    pub fn open_position(&mut self, intent: &TradeIntent, entry_price: f64, at: DateTime<Utc>) {
        let position = Position {
            trade_id: intent.trade_id,
            instrument: intent.instrument.clone(),
            direction: intent.direction,
            size_usd: intent.size_usd,
            entry_price,
            opened_at: at,
        };
        info!(
            trade_id = %position.trade_id,
            instrument = %position.instrument,
            direction = %position.direction,
            size = %position.size_usd,
            entry_price,
            "Position opened"
        );
        self.positions.insert(intent.trade_id, position);
    }

    /// Close a position with its realized P&L. Returns false if the trade
    /// had no open position (e.g. it never filled).
    pub fn close_position(&mut self, trade_id: Uuid, pnl: Decimal, at: DateTime<Utc>) -> bool {
        self.roll_day(at);
        let Some(position) = self.positions.remove(&trade_id) else {
            return false;
        };

        self.balance += pnl;
        self.daily_realized_pnl += pnl;
        self.total_realized_pnl += pnl;
        if self.balance > self.high_water_mark {
            self.high_water_mark = self.balance;
        }

        info!(
            trade_id = %trade_id,
            instrument = %position.instrument,
            pnl = %pnl,
            daily_pnl = %self.daily_realized_pnl,
            balance = %self.balance,
            "Position settled"
        );
        true
    }

    /// Zero the daily counters once the configured UTC hour has passed since
    /// the last reset. The drawdown reference restarts from the current
    /// balance.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let boundary = self.latest_boundary(now);
        if boundary <= self.last_reset {
            return false;
        }
        if now < self.last_reset {
            warn!(now = %now, last_reset = %self.last_reset, "Clock moved backwards; daily reset skipped");
            return false;
        }

        info!(
            daily_pnl = %self.daily_realized_pnl,
            balance = %self.balance,
            "Daily risk counters reset"
        );
        self.daily_realized_pnl = Decimal::ZERO;
        self.high_water_mark = self.balance;
        self.last_reset = now;
        true
    }

    /// Most recent reset instant at or before `now`.
    fn latest_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now
            .date_naive()
            .and_hms_opt(self.reset_hour_utc, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or(now);
        if today <= now {
            today
        } else {
            today - Duration::days(1)
        }
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.total_realized_pnl
    }

    pub fn drawdown(&self) -> f64 {
        if self.high_water_mark <= Decimal::ZERO || self.balance >= self.high_water_mark {
            return 0.0;
        }
        ((self.high_water_mark - self.balance) / self.high_water_mark)
            .to_f64()
            .unwrap_or(0.0)
    }
}

impl AccountState for AccountBook {
    fn snapshot(&self, now: DateTime<Utc>) -> AccountSnapshot {
        AccountSnapshot {
            open_positions: self.positions.len(),
            open_instruments: self.positions.values().map(|p| p.instrument.clone()).collect(),
            daily_realized_pnl: self.daily_realized_pnl,
            balance: self.balance,
            high_water_mark: self.high_water_mark,
            drawdown: self.drawdown(),
            taken_at: now,
        }
    }
}
