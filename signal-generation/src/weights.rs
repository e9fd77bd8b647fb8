// Processor Weights
// Versioned weight snapshots shared between fusion (reader) and learning
// (writer). Writers publish a complete replacement table; readers hold an
// `Arc` to whichever table was current when they looked.

use chrono::{DateTime, Utc};
use common::{ConfigError, ProcessorId, StrategyConfig, WEIGHT_SUM_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Bisection steps used when scaling weights down to a unit sum
const PROJECTION_STEPS: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    /// Incremented by every published update
    pub version: u64,
    pub weights: BTreeMap<ProcessorId, f64>,
    pub updated_at: DateTime<Utc>,
}

impl WeightTable {
    pub fn new(weights: BTreeMap<ProcessorId, f64>) -> Self {
        Self {
            version: 0,
            weights,
            updated_at: Utc::now(),
        }
    }

    /// Validated default table from configuration.
    pub fn from_config(config: &StrategyConfig) -> Result<Self, ConfigError> {
        let table = Self::new(config.weight_table()?);
        table.validate(config.learning.min_weight, config.learning.max_weight)?;
        Ok(table)
    }

    /// Weight of a processor; processors without an entry do not vote.
    pub fn weight(&self, processor: ProcessorId) -> f64 {
        self.weights.get(&processor).copied().unwrap_or(0.0)
    }

    pub fn sum(&self) -> f64 {
        self.weights.values().sum()
    }

    /// Successor table carrying new weights.
    pub fn next(&self, weights: BTreeMap<ProcessorId, f64>, at: DateTime<Utc>) -> Self {
        Self {
            version: self.version + 1,
            weights,
            updated_at: at,
        }
    }

    /// Every weight within `[min, max]` and the total at most 1.0.
    pub fn validate(&self, min: f64, max: f64) -> Result<(), ConfigError> {
        for (processor, weight) in &self.weights {
            if !weight.is_finite() || *weight < min - WEIGHT_SUM_TOLERANCE || *weight > max + WEIGHT_SUM_TOLERANCE {
                return Err(ConfigError::WeightOutOfBounds {
                    processor: *processor,
                    weight: *weight,
                    min,
                    max,
                });
            }
        }
        let sum = self.sum();
        if sum > 1.0 + WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSumExceeded(sum));
        }
        Ok(())
    }
}

/// Clamp every weight into `[min, max]`, then scale uniformly (re-clamping)
/// until the total is at most 1.0.
///
/// Relative order of the weights is preserved. Requires `min * n <= 1`.
pub fn project_weights(
    weights: &BTreeMap<ProcessorId, f64>,
    min: f64,
    max: f64,
) -> BTreeMap<ProcessorId, f64> {
    let scaled = |factor: f64| -> BTreeMap<ProcessorId, f64> {
        weights
            .iter()
            .map(|(id, w)| {
                let w = if w.is_finite() { *w } else { min };
                (*id, (w * factor).clamp(min, max))
            })
            .collect()
    };
    let total = |table: &BTreeMap<ProcessorId, f64>| table.values().sum::<f64>();

    let clamped = scaled(1.0);
    if total(&clamped) <= 1.0 {
        return clamped;
    }

    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    for _ in 0..PROJECTION_STEPS {
        let mid = (lo + hi) / 2.0;
        if total(&scaled(mid)) <= 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    scaled(lo)
}

/// Shared, atomically replaced weight snapshot.
#[derive(Debug, Clone)]
pub struct WeightHandle {
    sender: Arc<watch::Sender<Arc<WeightTable>>>,
}

impl WeightHandle {
    pub fn new(table: WeightTable) -> Self {
        let (sender, _) = watch::channel(Arc::new(table));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// The table in effect right now.
    pub fn current(&self) -> Arc<WeightTable> {
        self.sender.borrow().clone()
    }

    /// Replace the table as a unit.
    pub fn publish(&self, table: WeightTable) -> Arc<WeightTable> {
        let table = Arc::new(table);
        info!(version = table.version, sum = table.sum(), "Publishing weight table");
        self.sender.send_replace(table.clone());
        table
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<WeightTable>> {
        self.sender.subscribe()
    }
}
