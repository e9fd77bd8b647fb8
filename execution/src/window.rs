// Market Interval Timing
// Fixed-length intervals aligned to the Unix epoch, each with one trade window.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One market instance, e.g. the 15-minute session starting at 12:00 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketInterval {
    pub start: DateTime<Utc>,
    pub length_seconds: u64,
}

impl MarketInterval {
    /// The interval containing `at`.
    pub fn containing(at: DateTime<Utc>, length_seconds: u64) -> Self {
        let length = length_seconds.max(1) as i64;
        let epoch = at.timestamp();
        let start_epoch = epoch - epoch.rem_euclid(length);
        let start = Utc.timestamp_opt(start_epoch, 0).single().unwrap_or(at);
        Self {
            start,
            length_seconds: length as u64,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::seconds(self.length_seconds as i64)
    }

    /// Time elapsed since the interval began; negative before it starts.
    pub fn elapsed(&self, at: DateTime<Utc>) -> Duration {
        at - self.start
    }

    /// Market slug, `<prefix>-<start epoch seconds>`.
    pub fn instrument(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.start.timestamp())
    }
}

/// Offsets (seconds into the interval) bounding the decision window.
/// The start is inclusive, the end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeWindow {
    pub start_seconds: u64,
    pub end_seconds: u64,
}

impl TradeWindow {
    pub fn new(start_seconds: u64, end_seconds: u64) -> Self {
        Self {
            start_seconds,
            end_seconds,
        }
    }

    pub fn opens_at(&self, interval: &MarketInterval) -> DateTime<Utc> {
        interval.start + Duration::seconds(self.start_seconds as i64)
    }

    pub fn closes_at(&self, interval: &MarketInterval) -> DateTime<Utc> {
        interval.start + Duration::seconds(self.end_seconds as i64)
    }

    pub fn contains(&self, interval: &MarketInterval, at: DateTime<Utc>) -> bool {
        at >= self.opens_at(interval) && at < self.closes_at(interval)
    }

    pub fn has_closed(&self, interval: &MarketInterval, at: DateTime<Utc>) -> bool {
        at >= self.closes_at(interval)
    }

    /// Time left before the window closes, zero once it has.
    pub fn remaining(&self, interval: &MarketInterval, at: DateTime<Utc>) -> std::time::Duration {
        (self.closes_at(interval) - at)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}
