// Sentiment Analysis
// Contrarian read of the Fear & Greed index blended with news sentiment.

use super::{ProcessorInput, SignalProcessor};
use common::{ProcessorId, SentimentParams, Signal, SignalDirection, SignalStrength};
use serde_json::json;

/// Scores inside this band carry no opinion
const NEUTRAL_BAND: (f64, f64) = (45.0, 55.0);

pub struct SentimentProcessor {
    params: SentimentParams,
}

impl SentimentProcessor {
    pub fn new(params: SentimentParams) -> Self {
        Self { params }
    }

    fn extreme_tier(extremeness: f64) -> (SignalStrength, f64) {
        if extremeness >= 0.8 {
            (SignalStrength::VeryStrong, 0.85)
        } else if extremeness >= 0.5 {
            (SignalStrength::Strong, 0.75)
        } else {
            (SignalStrength::Moderate, 0.65)
        }
    }
}

impl SignalProcessor for SentimentProcessor {
    fn id(&self) -> ProcessorId {
        ProcessorId::SentimentAnalysis
    }

    fn process(&self, input: &ProcessorInput<'_>) -> Option<Signal> {
        let reading = input.context.sentiment.as_ref()?;
        let score = reading.composite_score();
        let fear = self.params.extreme_fear_threshold;
        let greed = self.params.extreme_greed_threshold;

        let (direction, strength, confidence) = if score <= fear {
            let extremeness = if fear > 0.0 { (fear - score) / fear } else { 1.0 };
            let (strength, confidence) = Self::extreme_tier(extremeness);
            (SignalDirection::Bullish, strength, confidence)
        } else if score >= greed {
            let extremeness = if greed < 100.0 {
                (score - greed) / (100.0 - greed)
            } else {
                1.0
            };
            let (strength, confidence) = Self::extreme_tier(extremeness);
            (SignalDirection::Bearish, strength, confidence)
        } else if score < NEUTRAL_BAND.0 {
            (SignalDirection::Bullish, SignalStrength::Weak, 0.55)
        } else if score > NEUTRAL_BAND.1 {
            (SignalDirection::Bearish, SignalStrength::Weak, 0.55)
        } else {
            return None;
        };

        if confidence < self.params.min_confidence {
            return None;
        }

        Some(
            Signal::new(self.id(), direction, strength, confidence, input.now).with_metadata(json!({
                "score": score,
                "fear_greed": reading.fear_greed,
                "classification": reading.classification,
                "news_positive_ratio": reading.news_positive_ratio,
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use data_ingestion::{MarketContext, SentimentReading};

    fn context(fear_greed: f64, news: Option<f64>) -> MarketContext {
        MarketContext {
            sentiment: Some(SentimentReading {
                fear_greed,
                classification: "test".to_string(),
                news_positive_ratio: news,
            }),
            ..Default::default()
        }
    }

    fn run(context: &MarketContext) -> Option<Signal> {
        let history = history(&[0.5], 1);
        SentimentProcessor::new(SentimentParams::default()).process(&input(0.5, &history, context))
    }

    #[test]
    fn test_extreme_fear_is_contrarian_bullish() {
        let signal = run(&context(3.0, None)).unwrap();
        assert_eq!(signal.direction, SignalDirection::Bullish);
        assert_eq!(signal.strength, SignalStrength::VeryStrong);
        assert_eq!(signal.confidence, 0.85);
    }

    #[test]
    fn test_extreme_greed_is_contrarian_bearish() {
        let signal = run(&context(80.0, None)).unwrap();
        assert_eq!(signal.direction, SignalDirection::Bearish);
        assert_eq!(signal.strength, SignalStrength::Moderate);
    }

    #[test]
    fn test_news_shifts_composite() {
        // 0.7 * 30 + 0.3 * 0 = 21 -> extreme fear
        let signal = run(&context(30.0, Some(0.0))).unwrap();
        assert_eq!(signal.direction, SignalDirection::Bullish);
        assert_eq!(signal.strength, SignalStrength::Moderate);
    }

    #[test]
    fn test_mild_and_neutral_bands() {
        let mild = run(&context(40.0, None)).unwrap();
        assert_eq!(mild.strength, SignalStrength::Weak);
        assert_eq!(mild.direction, SignalDirection::Bullish);

        assert!(run(&context(50.0, None)).is_none());
        assert!(run(&MarketContext::default()).is_none());
    }
}
