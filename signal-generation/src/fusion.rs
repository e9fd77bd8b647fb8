// Signal Fusion
// Weighted voting over the cycle's signals.

use crate::weights::WeightTable;
use chrono::{DateTime, Utc};
use common::{ProcessorId, Signal, SignalDirection, MAX_STRENGTH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

/// Differences smaller than this are a tie
const TIE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub direction: SignalDirection,
    /// 0 to 100
    pub score: f64,
    pub bullish_total: f64,
    pub bearish_total: f64,
    /// Ids of the directional signals that voted, ordered by processor
    pub contributing: Vec<Uuid>,
    pub signal_count: usize,
    pub weights_version: u64,
    /// Latest signal timestamp; `None` when nothing fired
    pub timestamp: Option<DateTime<Utc>>,
}

impl FusionResult {
    fn neutral(signal_count: usize, weights_version: u64, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            direction: SignalDirection::Neutral,
            score: 0.0,
            bullish_total: 0.0,
            bearish_total: 0.0,
            contributing: Vec::new(),
            signal_count,
            weights_version,
            timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FusionEngine {
    min_signals: usize,
}

impl FusionEngine {
    pub fn new(min_signals: usize) -> Self {
        Self { min_signals }
    }

    pub fn min_signals(&self) -> usize {
        self.min_signals
    }

    /// Fuse signals under a weight snapshot.
    ///
    /// Contribution of a directional signal is `weight * confidence * strength`.
    /// The score is the net contribution as a share of the maximum the
    /// participating processors could have produced. Pure and independent of
    /// the order of `signals`.
    pub fn fuse(&self, signals: &[Signal], weights: &WeightTable) -> FusionResult {
        let timestamp = signals.iter().map(|s| s.timestamp).max();
        if signals.len() < self.min_signals {
            debug!(
                signals = signals.len(),
                min_signals = self.min_signals,
                "Too few signals to fuse"
            );
            return FusionResult::neutral(signals.len(), weights.version, timestamp);
        }

        let mut ordered: Vec<&Signal> = signals.iter().collect();
        ordered.sort_by(|a, b| a.processor.cmp(&b.processor).then(a.id.cmp(&b.id)));

        let participating: BTreeSet<ProcessorId> = ordered.iter().map(|s| s.processor).collect();
        let capacity: f64 = participating.iter().map(|p| weights.weight(*p)).sum::<f64>()
            * MAX_STRENGTH as f64;

        let mut bullish_total = 0.0;
        let mut bearish_total = 0.0;
        let mut contributing = Vec::new();
        for signal in &ordered {
            let contribution =
                weights.weight(signal.processor) * signal.confidence * signal.strength.value() as f64;
            match signal.direction {
                SignalDirection::Bullish => bullish_total += contribution,
                SignalDirection::Bearish => bearish_total += contribution,
                SignalDirection::Neutral => continue,
            }
            contributing.push(signal.id);
        }

        let net = bullish_total - bearish_total;
        let direction = if net.abs() < TIE_EPSILON {
            SignalDirection::Neutral
        } else if net > 0.0 {
            SignalDirection::Bullish
        } else {
            SignalDirection::Bearish
        };
        let score = if capacity > 0.0 && direction != SignalDirection::Neutral {
            (100.0 * net.abs() / capacity).clamp(0.0, 100.0)
        } else {
            0.0
        };

        FusionResult {
            direction,
            score,
            bullish_total,
            bearish_total,
            contributing,
            signal_count: signals.len(),
            weights_version: weights.version,
            timestamp,
        }
    }
}
