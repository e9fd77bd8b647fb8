// Tick Velocity
// Fast moves in the market's own probability over the last minute are
// treated as real order flow and followed.

use super::{tiered_strength, ProcessorInput, SignalProcessor};
use chrono::{DateTime, Duration, Utc};
use common::{PriceSample, ProcessorId, Signal, SignalDirection, TickVelocityParams};
use serde_json::json;
use tracing::debug;

pub struct TickVelocityProcessor {
    params: TickVelocityParams,
}

impl TickVelocityProcessor {
    pub fn new(params: TickVelocityParams) -> Self {
        Self { params }
    }

    /// Price of the sample closest to `seconds_ago` before `now`, if one lies
    /// within the tolerance.
    fn price_at(&self, history: &[PriceSample], seconds_ago: i64, now: DateTime<Utc>) -> Option<f64> {
        let target = now - Duration::seconds(seconds_ago);
        let tolerance = self.params.tolerance_seconds;
        let mut best: Option<f64> = None;
        let mut best_diff = tolerance;

        for sample in history.iter().rev() {
            let offset = (sample.timestamp - target).num_milliseconds() as f64 / 1000.0;
            if offset.abs() < best_diff {
                best_diff = offset.abs();
                best = Some(sample.price);
            } else if -offset > tolerance {
                break;
            }
        }
        best.filter(|price| *price > 0.0)
    }
}

impl SignalProcessor for TickVelocityProcessor {
    fn id(&self) -> ProcessorId {
        ProcessorId::TickVelocity
    }

    fn process(&self, input: &ProcessorInput<'_>) -> Option<Signal> {
        if input.history.len() < self.params.min_ticks {
            debug!(ticks = input.history.len(), "TickVelocity: insufficient ticks");
            return None;
        }

        let current = input.current_price;
        let velocity = |past: f64| (current - past) / past;
        let price_60s = self.price_at(input.history, 60, input.now);
        let price_30s = self.price_at(input.history, 30, input.now);
        let vel_60s = price_60s.map(velocity);
        let vel_30s = price_30s.map(velocity);

        let (primary, threshold) = match (vel_30s, vel_60s) {
            (Some(v), _) => (v, self.params.threshold_30s),
            (None, Some(v)) => (v, self.params.threshold_60s),
            (None, None) => return None,
        };
        if primary.abs() < threshold {
            return None;
        }

        let acceleration = match (vel_60s, vel_30s) {
            (Some(v60), Some(v30)) => v30 - (v60 - v30),
            _ => 0.0,
        };

        let magnitude = primary.abs();
        let direction = if primary > 0.0 {
            SignalDirection::Bullish
        } else {
            SignalDirection::Bearish
        };
        let strength = tiered_strength(magnitude, [0.015, 0.025, 0.04]);

        let mut confidence = (0.55 + (magnitude / threshold - 1.0) * 0.12).min(0.82);
        if acceleration.signum() == primary.signum() && acceleration.abs() > 0.005 {
            confidence = (confidence + 0.06).min(0.88);
        }
        if let (Some(v60), Some(v30)) = (vel_60s, vel_30s) {
            if (v60 > 0.0) != (v30 > 0.0) {
                confidence *= 0.80;
            }
        }
        if confidence < self.params.min_confidence {
            return None;
        }

        Some(
            Signal::new(self.id(), direction, strength, confidence, input.now).with_metadata(json!({
                "velocity_60s": vel_60s,
                "velocity_30s": vel_30s,
                "acceleration": acceleration,
                "ticks": input.history.len(),
            })),
        )
    }
}
