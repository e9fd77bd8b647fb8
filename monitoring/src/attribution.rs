use common::{ProcessorId, SignalDirection, TradeOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Credit assigned to one processor for one settled trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessorCredit {
    pub processor: ProcessorId,
    /// `confidence * strength`, signed by whether the call was right
    pub credit: f64,
    pub correct: bool,
}

/// Credit every directional signal that fired on a settled trade.
///
/// A signal pointing the way the market resolved earns
/// `confidence * strength`, one pointing the other way loses the same.
/// Neutral signals cast no vote and earn nothing. Pending outcomes yield no
/// credits.
pub fn attribute(outcome: &TradeOutcome) -> Vec<ProcessorCredit> {
    let Some(resolution) = outcome.resolution() else {
        return Vec::new();
    };
    let winning = resolution.winning_direction().as_signal_direction();

    outcome
        .signals
        .iter()
        .filter(|s| s.direction != SignalDirection::Neutral)
        .map(|s| {
            let correct = s.direction == winning;
            let magnitude = s.confidence * s.strength.value() as f64;
            ProcessorCredit {
                processor: s.processor,
                credit: if correct { magnitude } else { -magnitude },
                correct,
            }
        })
        .collect()
}

/// Running credit per processor over a batch of outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditSummary {
    pub samples: usize,
    pub total_credit: f64,
}

impl CreditSummary {
    pub fn average(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_credit / self.samples as f64
        }
    }
}

/// Aggregate credits across settled outcomes, skipping pending ones.
pub fn summarize<'a>(
    outcomes: impl IntoIterator<Item = &'a TradeOutcome>,
) -> BTreeMap<ProcessorId, CreditSummary> {
    let mut summary: BTreeMap<ProcessorId, CreditSummary> = BTreeMap::new();
    for outcome in outcomes {
        for credit in attribute(outcome) {
            let entry = summary.entry(credit.processor).or_default();
            entry.samples += 1;
            entry.total_credit += credit.credit;
        }
    }
    summary
}
