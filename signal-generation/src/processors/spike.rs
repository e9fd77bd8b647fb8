// Spike Detection
// Fades sharp deviations from the recent moving average.

use super::{tiered_strength, ProcessorInput, SignalProcessor};
use common::{ProcessorId, Signal, SignalDirection, SpikeParams};
use serde_json::json;

pub struct SpikeDetectionProcessor {
    params: SpikeParams,
}

impl SpikeDetectionProcessor {
    pub fn new(params: SpikeParams) -> Self {
        Self { params }
    }
}

impl SignalProcessor for SpikeDetectionProcessor {
    fn id(&self) -> ProcessorId {
        ProcessorId::SpikeDetection
    }

    fn process(&self, input: &ProcessorInput<'_>) -> Option<Signal> {
        let lookback = self.params.lookback_periods.max(1);
        if input.history.len() < lookback {
            return None;
        }

        let recent = &input.history[input.history.len() - lookback..];
        let average = recent.iter().map(|s| s.price).sum::<f64>() / lookback as f64;
        if average <= 0.0 {
            return None;
        }

        let deviation = (input.current_price - average) / average;
        let magnitude = deviation.abs();
        if magnitude < self.params.spike_threshold {
            return None;
        }

        let confidence = (0.50 + (magnitude - self.params.spike_threshold) * 2.0).min(0.95);
        if confidence < self.params.min_confidence {
            return None;
        }

        let direction = if deviation > 0.0 {
            SignalDirection::Bearish
        } else {
            SignalDirection::Bullish
        };
        let strength = tiered_strength(magnitude, [0.15, 0.20, 0.25]);

        Some(
            Signal::new(self.id(), direction, strength, confidence, input.now).with_metadata(json!({
                "moving_average": average,
                "deviation": deviation,
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use common::SignalStrength;
    use data_ingestion::MarketContext;

    fn processor() -> SpikeDetectionProcessor {
        SpikeDetectionProcessor::new(SpikeParams::default())
    }

    #[test]
    fn test_upward_spike_is_faded() {
        let history = history(&[0.50; 20], 10);
        let context = MarketContext::default();

        // +24% over the average
        let signal = processor().process(&input(0.62, &history, &context)).unwrap();
        assert_eq!(signal.direction, SignalDirection::Bearish);
        assert_eq!(signal.strength, SignalStrength::Strong);
        assert!((signal.confidence - 0.88).abs() < 1e-9);
    }

    #[test]
    fn test_downward_spike_is_faded() {
        let history = history(&[0.50; 20], 10);
        let context = MarketContext::default();

        let signal = processor().process(&input(0.45, &history, &context)).unwrap();
        assert_eq!(signal.direction, SignalDirection::Bullish);
        assert_eq!(signal.strength, SignalStrength::Weak);
        assert!((signal.confidence - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_small_deviation_is_silent() {
        let history = history(&[0.50; 20], 10);
        let context = MarketContext::default();
        // 6% deviation passes the threshold but not the confidence floor
        assert!(processor().process(&input(0.53, &history, &context)).is_none());
        assert!(processor().process(&input(0.51, &history, &context)).is_none());
    }

    #[test]
    fn test_short_history_is_silent() {
        let history = history(&[0.50; 10], 10);
        let context = MarketContext::default();
        assert!(processor().process(&input(0.90, &history, &context)).is_none());
    }
}
