// Trend Filter
// Directional bias from the current price level alone.

use common::{SignalDirection, TradeDirection};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Up,
    Down,
    Skip,
}

impl TrendDirection {
    /// The trade this trend asks for, if any.
    pub fn trade_direction(&self) -> Option<TradeDirection> {
        match self {
            TrendDirection::Up => Some(TradeDirection::BuyYes),
            TrendDirection::Down => Some(TradeDirection::BuyNo),
            TrendDirection::Skip => None,
        }
    }

    /// Fusion direction that agrees with this trend.
    pub fn agreeing_signal(&self) -> Option<SignalDirection> {
        self.trade_direction().map(|d| d.as_signal_direction())
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Up => f.write_str("UP"),
            TrendDirection::Down => f.write_str("DOWN"),
            TrendDirection::Skip => f.write_str("SKIP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendDecision {
    pub direction: TrendDirection,
    pub price: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct TrendFilter {
    up_threshold: f64,
    down_threshold: f64,
}

impl TrendFilter {
    pub fn new(up_threshold: f64, down_threshold: f64) -> Self {
        Self {
            up_threshold,
            down_threshold,
        }
    }

    /// Thresholds are inclusive: a price exactly at a threshold triggers it.
    pub fn classify(&self, price: f64) -> TrendDecision {
        classify(price, self.up_threshold, self.down_threshold)
    }
}

pub fn classify(price: f64, up_threshold: f64, down_threshold: f64) -> TrendDecision {
    let direction = if price >= up_threshold {
        TrendDirection::Up
    } else if price <= down_threshold {
        TrendDirection::Down
    } else {
        TrendDirection::Skip
    };
    TrendDecision { direction, price }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_inclusive() {
        let filter = TrendFilter::new(0.60, 0.40);
        assert_eq!(filter.classify(0.60).direction, TrendDirection::Up);
        assert_eq!(filter.classify(0.40).direction, TrendDirection::Down);
        assert_eq!(filter.classify(0.5999).direction, TrendDirection::Skip);
        assert_eq!(filter.classify(0.4001).direction, TrendDirection::Skip);
    }

    #[test]
    fn test_classify_extremes() {
        assert_eq!(classify(0.65, 0.60, 0.40).direction, TrendDirection::Up);
        assert_eq!(classify(0.35, 0.60, 0.40).direction, TrendDirection::Down);
        assert_eq!(classify(0.50, 0.60, 0.40).direction, TrendDirection::Skip);
        assert_eq!(classify(f64::NAN, 0.60, 0.40).direction, TrendDirection::Skip);
    }

    #[test]
    fn test_trade_direction_mapping() {
        assert_eq!(TrendDirection::Up.trade_direction(), Some(TradeDirection::BuyYes));
        assert_eq!(TrendDirection::Down.agreeing_signal(), Some(SignalDirection::Bearish));
        assert_eq!(TrendDirection::Skip.trade_direction(), None);
    }
}
