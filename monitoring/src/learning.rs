// Learning Engine
// Attributes settled outcomes to the processors that fired and periodically
// nudges their fusion weights, publishing each new table as a unit.

use crate::attribution::{summarize, CreditSummary};
use crate::performance::{PerformanceTracker, ProcessorRanking, TradeSummary};
use crate::store::{LearningState, LearningStateStore};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use common::{LearningSettings, ProcessorId, TradeOutcome, Uuid};
use serde::{Deserialize, Serialize};
use signal_generation::{project_weights, WeightHandle, WeightTable};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Record of one weight recomputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightAdjustment {
    pub version: u64,
    pub at: DateTime<Utc>,
    pub trades_used: usize,
    pub old_weights: BTreeMap<ProcessorId, f64>,
    pub new_weights: BTreeMap<ProcessorId, f64>,
    pub credits: BTreeMap<ProcessorId, CreditSummary>,
}

/// Snapshot of what the engine has learned so far
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningInsights {
    pub generated_at: DateTime<Utc>,
    pub weights: WeightTable,
    pub trades_since_last_optimization: usize,
    pub rankings: Vec<ProcessorRanking>,
    pub summary: TradeSummary,
    pub recent_adjustments: Vec<WeightAdjustment>,
}

pub struct LearningEngine {
    settings: LearningSettings,
    weights: WeightHandle,
    store: Arc<dyn LearningStateStore>,
    /// Outcomes recorded since the last optimisation, keyed by trade id
    outcomes: BTreeMap<Uuid, TradeOutcome>,
    trades_since_last_optimization: usize,
    last_optimized_at: Option<DateTime<Utc>>,
    adjustments: VecDeque<WeightAdjustment>,
    performance: PerformanceTracker,
    needs_attention: bool,
    dirty: bool,
}

impl LearningEngine {
    /// Load persisted state, falling back to `defaults` when it is absent,
    /// unreadable or fails validation. Never fails.
    pub async fn initialize(
        settings: LearningSettings,
        defaults: WeightTable,
        store: Arc<dyn LearningStateStore>,
    ) -> Self {
        let mut needs_attention = false;
        let state = match store.load().await {
            Ok(Some(state)) => match validate_state(&state, &settings) {
                Ok(()) => {
                    info!(
                        version = state.version,
                        trades_since_last_optimization = state.trades_since_last_optimization,
                        adjustments = state.adjustments.len(),
                        "Restored learning state"
                    );
                    Some(state)
                }
                Err(e) => {
                    warn!(error = %e, "Stored learning state is invalid; using default weights");
                    needs_attention = true;
                    None
                }
            },
            Ok(None) => {
                info!("No stored learning state; using default weights");
                None
            }
            Err(e) => {
                warn!(error = ?e, "Failed to load learning state; using default weights");
                needs_attention = true;
                None
            }
        };

        let mut engine = Self {
            weights: WeightHandle::new(defaults),
            settings,
            store,
            outcomes: BTreeMap::new(),
            trades_since_last_optimization: 0,
            last_optimized_at: None,
            adjustments: VecDeque::new(),
            performance: PerformanceTracker::new(),
            needs_attention,
            dirty: false,
        };

        if let Some(state) = state {
            engine.weights = WeightHandle::new(state.weight_table());
            engine.trades_since_last_optimization = state.trades_since_last_optimization;
            engine.last_optimized_at = state.last_optimized_at;
            engine.adjustments = state.adjustments.into_iter().collect();
            engine.performance = PerformanceTracker::from_records(state.performance, state.summary);
            engine.trim_history();
        }
        engine
    }

    /// Record a trade outcome. A trade counts once toward the optimisation
    /// trigger; recording it again after settlement replaces the pending
    /// entry.
    pub fn record_outcome(&mut self, outcome: TradeOutcome) {
        match self.outcomes.get(&outcome.trade_id) {
            Some(existing) if existing.is_settled() => {
                debug!(trade_id = %outcome.trade_id, "Outcome already settled; ignoring");
                return;
            }
            Some(_) => {}
            None => self.trades_since_last_optimization += 1,
        }

        if outcome.is_settled() {
            self.performance.record(&outcome);
        }
        debug!(
            trade_id = %outcome.trade_id,
            settlement = ?outcome.settlement,
            pnl = %outcome.pnl,
            trades_since_last_optimization = self.trades_since_last_optimization,
            "Outcome recorded"
        );
        self.outcomes.insert(outcome.trade_id, outcome);
        self.dirty = true;
    }

    /// Recompute weights once enough trades were recorded.
    ///
    /// Only settled outcomes are attributed; pending ones wait for the next
    /// update. When nothing has settled yet the counter is kept.
    pub async fn maybe_optimize(&mut self, now: DateTime<Utc>) -> Option<WeightAdjustment> {
        if self.trades_since_last_optimization < self.settings.learning_trigger_interval {
            self.save_if_dirty().await;
            return None;
        }

        let settled: Vec<&TradeOutcome> = self.outcomes.values().filter(|o| o.is_settled()).collect();
        if settled.is_empty() {
            debug!(
                recorded = self.outcomes.len(),
                "Learning trigger reached but no outcomes have settled"
            );
            self.save_if_dirty().await;
            return None;
        }

        let credits = summarize(settled.iter().copied());
        let trades_used = settled.len();
        let current = self.weights.current();
        let table = current.next(self.adjusted_weights(&current, &credits), now);

        for (processor, new_weight) in &table.weights {
            let old_weight = current.weight(*processor);
            info!(
                processor = %processor,
                old = old_weight,
                new = new_weight,
                change = new_weight - old_weight,
                "Weight adjusted"
            );
        }

        let adjustment = WeightAdjustment {
            version: table.version,
            at: now,
            trades_used,
            old_weights: current.weights.clone(),
            new_weights: table.weights.clone(),
            credits,
        };

        self.outcomes.retain(|_, outcome| !outcome.is_settled());
        self.trades_since_last_optimization = 0;
        self.last_optimized_at = Some(now);
        self.adjustments.push_back(adjustment.clone());
        self.trim_history();

        self.weights.publish(table);
        self.dirty = true;
        self.save_if_dirty().await;

        info!(version = adjustment.version, trades_used, "Weights optimized");
        Some(adjustment)
    }

    /// Multiplicative update followed by projection back into bounds.
    fn adjusted_weights(
        &self,
        current: &WeightTable,
        credits: &BTreeMap<ProcessorId, CreditSummary>,
    ) -> BTreeMap<ProcessorId, f64> {
        let mut weights = current.weights.clone();
        for (processor, summary) in credits {
            if summary.samples < self.settings.min_processor_samples {
                continue;
            }
            if let Some(weight) = weights.get_mut(processor) {
                *weight *= 1.0 + self.settings.learning_rate * summary.average();
            }
        }
        project_weights(&weights, self.settings.min_weight, self.settings.max_weight)
    }

    /// Persist the current state.
    pub async fn save(&mut self) -> Result<()> {
        let state = self.state();
        match self.store.save(&state).await {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                error!(error = ?e, "Failed to save learning state");
                self.needs_attention = true;
                Err(e)
            }
        }
    }

    async fn save_if_dirty(&mut self) {
        if self.dirty {
            // Failure is logged and flagged inside save
            let _ = self.save().await;
        }
    }

    fn trim_history(&mut self) {
        while self.adjustments.len() > self.settings.history_limit {
            self.adjustments.pop_front();
        }
    }

    pub fn state(&self) -> LearningState {
        let table = self.weights.current();
        LearningState {
            version: table.version,
            weights: table.weights.clone(),
            trades_since_last_optimization: self.trades_since_last_optimization,
            last_optimized_at: self.last_optimized_at,
            saved_at: Utc::now(),
            adjustments: self.adjustments.iter().cloned().collect(),
            performance: self.performance.records().clone(),
            summary: self.performance.summary().clone(),
        }
    }

    /// Handle shared with the fusion engine
    pub fn weights(&self) -> WeightHandle {
        self.weights.clone()
    }

    pub fn trades_since_last_optimization(&self) -> usize {
        self.trades_since_last_optimization
    }

    pub fn last_optimized_at(&self) -> Option<DateTime<Utc>> {
        self.last_optimized_at
    }

    /// Outcomes recorded but not yet settled
    pub fn pending_outcomes(&self) -> usize {
        self.outcomes.values().filter(|o| !o.is_settled()).count()
    }

    /// True when stored state had to be discarded or could not be saved
    pub fn needs_attention(&self) -> bool {
        self.needs_attention
    }

    pub fn performance(&self) -> &PerformanceTracker {
        &self.performance
    }

    pub fn rankings(&self) -> Vec<ProcessorRanking> {
        self.performance.rankings(&self.weights.current())
    }

    /// Most recent weight adjustments, oldest first
    pub fn learning_history(&self, limit: usize) -> Vec<WeightAdjustment> {
        let skip = self.adjustments.len().saturating_sub(limit);
        self.adjustments.iter().skip(skip).cloned().collect()
    }

    pub fn insights(&self) -> LearningInsights {
        LearningInsights {
            generated_at: Utc::now(),
            weights: self.weights.current().as_ref().clone(),
            trades_since_last_optimization: self.trades_since_last_optimization,
            rankings: self.rankings(),
            summary: self.performance.summary().clone(),
            recent_adjustments: self.learning_history(5),
        }
    }
}

fn validate_state(state: &LearningState, settings: &LearningSettings) -> Result<()> {
    if let Some(missing) = ProcessorId::ALL.iter().find(|p| !state.weights.contains_key(p)) {
        return Err(anyhow!("weight for {} is missing", missing));
    }
    state
        .weight_table()
        .validate(settings.min_weight, settings.max_weight)?;
    Ok(())
}
