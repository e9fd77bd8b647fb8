//! Bounded price history for the active instrument

use common::PriceSample;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Fixed-capacity, time-ordered store of recent price samples.
///
/// The oldest sample is evicted when capacity is reached. Samples older than
/// the newest one are rejected so the buffer stays ordered.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    samples: VecDeque<PriceSample>,
    capacity: usize,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample. Returns false if it was invalid or out of order.
    pub fn push(&mut self, sample: PriceSample) -> bool {
        if !sample.is_valid() {
            debug!(price = sample.price, "Dropping invalid price sample");
            return false;
        }
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                debug!(
                    timestamp = %sample.timestamp,
                    last = %last.timestamp,
                    "Dropping out-of-order price sample"
                );
                return false;
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<PriceSample> {
        self.samples.back().copied()
    }

    /// Copy of the buffer, oldest first.
    pub fn snapshot(&self) -> Vec<PriceSample> {
        self.samples.iter().copied().collect()
    }
}

/// Price history shared between the tick stream (writer) and decision cycles
/// (snapshot readers). Critical sections are a push or a copy, never I/O.
#[derive(Debug, Clone)]
pub struct SharedPriceHistory {
    inner: Arc<Mutex<PriceHistory>>,
}

impl SharedPriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PriceHistory::new(capacity))),
        }
    }

    pub fn push(&self, sample: PriceSample) -> bool {
        self.lock().push(sample)
    }

    pub fn snapshot(&self) -> Vec<PriceSample> {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PriceHistory> {
        // A panic while holding the lock cannot leave the buffer half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Local statistics of a price snapshot, logged with every decision cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceStats {
    /// Simple moving average of the last 20 samples
    pub sma_20: f64,
    /// Relative deviation of the current price from the SMA
    pub deviation: f64,
    /// Relative change against the sample 5 positions back
    pub momentum: f64,
    /// Standard deviation of the last 20 samples
    pub volatility: f64,
}

impl PriceStats {
    pub fn compute(current_price: f64, samples: &[PriceSample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let recent = &samples[samples.len().saturating_sub(20)..];
        let n = recent.len() as f64;
        let sma_20 = recent.iter().map(|s| s.price).sum::<f64>() / n;
        let deviation = if sma_20 > 0.0 {
            (current_price - sma_20) / sma_20
        } else {
            0.0
        };
        let momentum = if samples.len() >= 5 {
            let past = samples[samples.len() - 5].price;
            if past > 0.0 {
                (current_price - past) / past
            } else {
                0.0
            }
        } else {
            0.0
        };
        let variance = recent.iter().map(|s| (s.price - sma_20).powi(2)).sum::<f64>() / n;

        Some(Self {
            sma_20,
            deviation,
            momentum,
            volatility: variance.sqrt(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn sample(secs: i64, price: f64) -> PriceSample {
        PriceSample::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs), price)
    }

    #[test]
    fn test_evicts_oldest_on_overflow() {
        let mut history = PriceHistory::new(3);
        for i in 0..5 {
            assert!(history.push(sample(i, 0.5)));
        }
        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].timestamp, sample(2, 0.5).timestamp);
        assert_eq!(history.latest().unwrap().timestamp, sample(4, 0.5).timestamp);
    }

    #[test]
    fn test_rejects_out_of_order_and_invalid() {
        let mut history = PriceHistory::new(10);
        assert!(history.push(sample(10, 0.5)));
        assert!(!history.push(sample(5, 0.5)));
        assert!(!history.push(sample(11, 1.5)));
        assert!(!history.push(sample(12, f64::NAN)));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_shared_history_snapshot_is_detached() {
        let shared = SharedPriceHistory::new(10);
        shared.push(sample(0, 0.4));
        let snapshot = shared.snapshot();
        shared.push(sample(1, 0.6));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(shared.len(), 2);
    }

    #[test]
    fn test_price_stats() {
        let samples: Vec<_> = (0..20).map(|i| sample(i, 0.50)).collect();
        let stats = PriceStats::compute(0.55, &samples).unwrap();

        assert!((stats.sma_20 - 0.50).abs() < 1e-12);
        assert!((stats.deviation - 0.10).abs() < 1e-9);
        assert!((stats.momentum - 0.10).abs() < 1e-9);
        assert!(stats.volatility.abs() < 1e-12);
        assert!(PriceStats::compute(0.5, &[]).is_none());
    }
}
