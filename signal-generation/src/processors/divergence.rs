// Price Divergence
// Compares the market's probability against spot momentum: fades extreme
// probabilities the spot move does not confirm, and follows spot momentum
// the market has not priced in yet.

use super::{ProcessorInput, SignalProcessor};
use common::{DivergenceParams, ProcessorId, Signal, SignalDirection, SignalStrength};
use data_ingestion::PriceStats;
use serde_json::json;
use tracing::debug;

/// Spot momentum that counts as confirming an extreme probability
const CONFIRMING_MOMENTUM: f64 = 0.001;

/// Probability band in which the market is considered undecided
const UNDECIDED_BAND: (f64, f64) = (0.35, 0.65);

pub struct PriceDivergenceProcessor {
    params: DivergenceParams,
}

impl PriceDivergenceProcessor {
    pub fn new(params: DivergenceParams) -> Self {
        Self { params }
    }

    /// Spot momentum from the spot feed; the market's own 5-sample momentum
    /// when the feed is missing.
    fn momentum(&self, input: &ProcessorInput<'_>) -> f64 {
        match &input.context.spot {
            Some(spot) => spot.momentum.unwrap_or(0.0),
            None => PriceStats::compute(input.current_price, input.history)
                .map(|stats| stats.momentum)
                .unwrap_or(0.0),
        }
    }

    fn fade(&self, direction: SignalDirection, extremeness: f64, input: &ProcessorInput<'_>, momentum: f64) -> Signal {
        let confidence = (self.params.min_confidence + extremeness * 0.25).min(0.80);
        let strength = if extremeness > 0.5 {
            SignalStrength::Strong
        } else {
            SignalStrength::Moderate
        };
        Signal::new(self.id(), direction, strength, confidence, input.now).with_metadata(json!({
            "kind": "extreme_probability_fade",
            "probability": input.current_price,
            "spot_momentum": momentum,
            "extremeness": extremeness,
        }))
    }
}

impl SignalProcessor for PriceDivergenceProcessor {
    fn id(&self) -> ProcessorId {
        ProcessorId::PriceDivergence
    }

    fn process(&self, input: &ProcessorInput<'_>) -> Option<Signal> {
        let probability = input.current_price;
        let momentum = self.momentum(input);
        debug!(probability, momentum, "PriceDivergence inputs");

        let high = self.params.extreme_prob_threshold;
        let low = self.params.low_prob_threshold;
        if probability >= high && momentum <= CONFIRMING_MOMENTUM {
            let extremeness = (probability - high) / (1.0 - high);
            return Some(self.fade(SignalDirection::Bearish, extremeness, input, momentum));
        }
        if probability <= low && momentum >= -CONFIRMING_MOMENTUM {
            let extremeness = (low - probability) / low;
            return Some(self.fade(SignalDirection::Bullish, extremeness, input, momentum));
        }

        let undecided = (UNDECIDED_BAND.0..=UNDECIDED_BAND.1).contains(&probability);
        if !undecided || momentum.abs() < self.params.momentum_threshold {
            return None;
        }

        let multiple = momentum.abs() / self.params.momentum_threshold;
        let confidence = (0.55 + (multiple - 1.0).min(2.0) * 0.08).min(0.78);
        if confidence < self.params.min_confidence {
            return None;
        }
        let strength = if multiple >= 3.0 {
            SignalStrength::Strong
        } else if multiple >= 2.0 {
            SignalStrength::Moderate
        } else {
            SignalStrength::Weak
        };
        let direction = if momentum > 0.0 {
            SignalDirection::Bullish
        } else {
            SignalDirection::Bearish
        };

        Some(
            Signal::new(self.id(), direction, strength, confidence, input.now).with_metadata(json!({
                "kind": "momentum_mispricing",
                "probability": probability,
                "spot_momentum": momentum,
                "momentum_multiple": multiple,
            })),
        )
    }
}
