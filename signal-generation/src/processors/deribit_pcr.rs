// Deribit Put/Call Ratio
// Contrarian read of options positioning: heavy put buying is fear, heavy
// call buying is greed.

use super::{ProcessorInput, SignalProcessor};
use common::{PcrParams, ProcessorId, Signal, SignalDirection, SignalStrength};
use serde_json::json;

pub struct DeribitPcrProcessor {
    params: PcrParams,
}

impl DeribitPcrProcessor {
    pub fn new(params: PcrParams) -> Self {
        Self { params }
    }
}

impl SignalProcessor for DeribitPcrProcessor {
    fn id(&self) -> ProcessorId {
        ProcessorId::DeribitPcr
    }

    fn process(&self, input: &ProcessorInput<'_>) -> Option<Signal> {
        let reading = input.context.pcr.as_ref()?;
        let pcr = reading.effective_pcr();
        let bullish = self.params.bullish_pcr_threshold;
        let bearish = self.params.bearish_pcr_threshold;

        let (direction, extremeness, strength) = if pcr >= bullish {
            let strength = if pcr >= 1.60 {
                SignalStrength::VeryStrong
            } else if pcr >= 1.40 {
                SignalStrength::Strong
            } else {
                SignalStrength::Moderate
            };
            (SignalDirection::Bullish, (pcr - bullish) / bullish, strength)
        } else if pcr <= bearish {
            let strength = if pcr <= 0.45 {
                SignalStrength::VeryStrong
            } else if pcr <= 0.55 {
                SignalStrength::Strong
            } else {
                SignalStrength::Moderate
            };
            (SignalDirection::Bearish, (bearish - pcr) / bearish, strength)
        } else {
            return None;
        };

        let confidence = (0.57 + extremeness * 0.15).min(0.80);
        if confidence < self.params.min_confidence {
            return None;
        }

        Some(
            Signal::new(self.id(), direction, strength, confidence, input.now).with_metadata(json!({
                "pcr": pcr,
                "overall_pcr": reading.overall_pcr,
                "short_dated": reading.short_pcr.is_some(),
            })),
        )
    }
}
