use crate::attribution::attribute;
use chrono::{DateTime, NaiveDate, Utc};
use common::{Decimal, ProcessorId, Settlement, TradeOutcome};
use serde::{Deserialize, Serialize};
use signal_generation::WeightTable;
use std::collections::BTreeMap;

/// Equity points kept for the curve; older points are dropped
const EQUITY_CURVE_LIMIT: usize = 1000;

/// Lifetime record of one processor over settled trades it fired on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorPerformance {
    pub processor: ProcessorId,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_credit: f64,
    pub total_pnl: Decimal,
    pub total_confidence: f64,
}

impl ProcessorPerformance {
    fn new(processor: ProcessorId) -> Self {
        Self {
            processor,
            total_trades: 0,
            wins: 0,
            losses: 0,
            total_credit: 0.0,
            total_pnl: Decimal::ZERO,
            total_confidence: 0.0,
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.total_trades as f64
        }
    }

    pub fn avg_credit(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.total_credit / self.total_trades as f64
        }
    }

    pub fn avg_confidence(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.total_confidence / self.total_trades as f64
        }
    }
}

/// One row of the processor leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorRanking {
    pub processor: ProcessorId,
    pub total_trades: usize,
    pub win_rate: f64,
    pub avg_credit: f64,
    pub total_credit: f64,
    pub total_pnl: Decimal,
    pub current_weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub at: DateTime<Utc>,
    pub cumulative_pnl: Decimal,
}

/// Strategy-wide results over settled trades
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    /// Filled trades settled
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Approved trades that never filled
    pub unfilled: usize,
    pub total_pnl: Decimal,
    pub best_trade: Option<Decimal>,
    pub worst_trade: Option<Decimal>,
    /// Realized P&L per UTC settlement day
    pub daily_pnl: BTreeMap<NaiveDate, Decimal>,
    pub equity_curve: Vec<EquityPoint>,
}

impl TradeSummary {
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.total_trades as f64
        }
    }

    pub fn avg_pnl(&self) -> Decimal {
        if self.total_trades == 0 {
            Decimal::ZERO
        } else {
            self.total_pnl / Decimal::from(self.total_trades)
        }
    }

    fn record(&mut self, outcome: &TradeOutcome) {
        if !outcome.filled {
            self.unfilled += 1;
            return;
        }

        self.total_trades += 1;
        match outcome.settlement {
            Settlement::Win => self.wins += 1,
            Settlement::Lose => self.losses += 1,
            Settlement::Pending => {}
        }
        self.total_pnl += outcome.pnl;
        self.best_trade = Some(self.best_trade.map_or(outcome.pnl, |best| best.max(outcome.pnl)));
        self.worst_trade = Some(self.worst_trade.map_or(outcome.pnl, |worst| worst.min(outcome.pnl)));

        let at = outcome.settled_at.unwrap_or(outcome.created_at);
        *self.daily_pnl.entry(at.date_naive()).or_insert(Decimal::ZERO) += outcome.pnl;
        self.equity_curve.push(EquityPoint {
            at,
            cumulative_pnl: self.total_pnl,
        });
        if self.equity_curve.len() > EQUITY_CURVE_LIMIT {
            let excess = self.equity_curve.len() - EQUITY_CURVE_LIMIT;
            self.equity_curve.drain(..excess);
        }
    }
}

/// Performance Tracker - per-processor statistics and the strategy-wide
/// summary over settled outcomes
#[derive(Debug, Clone, Default)]
pub struct PerformanceTracker {
    processors: BTreeMap<ProcessorId, ProcessorPerformance>,
    summary: TradeSummary,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(
        processors: BTreeMap<ProcessorId, ProcessorPerformance>,
        summary: TradeSummary,
    ) -> Self {
        Self {
            processors,
            summary,
        }
    }

    /// Fold a settled outcome into the statistics. Pending outcomes are ignored.
    pub fn record(&mut self, outcome: &TradeOutcome) {
        if !outcome.is_settled() {
            return;
        }
        self.summary.record(outcome);

        for credit in attribute(outcome) {
            let entry = self
                .processors
                .entry(credit.processor)
                .or_insert_with(|| ProcessorPerformance::new(credit.processor));
            entry.total_trades += 1;
            if credit.correct {
                entry.wins += 1;
            } else {
                entry.losses += 1;
            }
            entry.total_credit += credit.credit;
            entry.total_pnl += outcome.pnl;
            if let Some(signal) = outcome.signals.iter().find(|s| s.processor == credit.processor) {
                entry.total_confidence += signal.confidence;
            }
        }
    }

    pub fn get(&self, processor: ProcessorId) -> Option<&ProcessorPerformance> {
        self.processors.get(&processor)
    }

    pub fn records(&self) -> &BTreeMap<ProcessorId, ProcessorPerformance> {
        &self.processors
    }

    pub fn summary(&self) -> &TradeSummary {
        &self.summary
    }

    /// Processors ordered by total credit, best first.
    pub fn rankings(&self, weights: &WeightTable) -> Vec<ProcessorRanking> {
        let mut rankings: Vec<ProcessorRanking> = self
            .processors
            .values()
            .map(|p| ProcessorRanking {
                processor: p.processor,
                total_trades: p.total_trades,
                win_rate: p.win_rate(),
                avg_credit: p.avg_credit(),
                total_credit: p.total_credit,
                total_pnl: p.total_pnl,
                current_weight: weights.weight(p.processor),
            })
            .collect();
        rankings.sort_by(|a, b| {
            b.total_credit
                .total_cmp(&a.total_credit)
                .then(a.processor.cmp(&b.processor))
        });
        rankings
    }
}
