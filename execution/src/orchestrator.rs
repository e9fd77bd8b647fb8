// Decision Orchestrator
// Sequences one decision per market interval: context fan-out, processors,
// fusion, trend and agreement gate, risk check, then execution. Everything
// after window entry runs under a deadline at the window's close.

use crate::clock::Clock;
use crate::events::{DecisionEvent, EventBus, SkipReason};
use crate::executor::{ExecutionClient, PaperExecutor};
use crate::window::{MarketInterval, TradeWindow};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{
    ConfigError, ExecutionReport, MarketResolution, PriceSample, Signal, SignalSnapshot,
    StrategyConfig, TradeIntent, TradeOutcome, Uuid,
};
use data_ingestion::{ContextFetcher, PriceStats, SharedPriceHistory};
use monitoring::{JsonFileStore, LearningEngine};
use portfolio_risk::{AccountSnapshot, RiskManager};
use serde::{Deserialize, Serialize};
use signal_generation::{
    AgreementGate, FusionEngine, GateOutcome, ProcessorInput, ProcessorSet, TrendFilter,
    WeightHandle, WeightTable,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Ticks queued for evaluation behind a running cycle
const EVALUATION_QUEUE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    Idle,
    AwaitingWindow,
    FetchingContext,
    Fusing,
    Gating,
    RiskCheck,
    Executing,
    Skipped,
}

/// What a tick led to, when it led to anything
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Traded {
        intent: TradeIntent,
        report: ExecutionReport,
    },
    /// Approved but not filled yet; retried on the next in-window tick
    AwaitingFill { intent: TradeIntent, reason: String },
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
struct PendingTrade {
    intent: TradeIntent,
    signals: Vec<SignalSnapshot>,
    attempts: u32,
    last_failure: String,
}

#[derive(Debug)]
enum Phase {
    /// Nothing decided yet this interval
    Open,
    AwaitingFill(PendingTrade),
    /// Trade or skip recorded; further ticks are ignored
    Decided,
}

#[derive(Debug)]
struct CycleState {
    interval: Option<MarketInterval>,
    phase: Phase,
}

enum CycleResult {
    Skip(SkipReason),
    Filled(PendingTrade, ExecutionReport),
    Unfilled(PendingTrade),
}

pub struct DecisionOrchestrator {
    config: StrategyConfig,
    window: TradeWindow,
    history: SharedPriceHistory,
    context: ContextFetcher,
    processors: ProcessorSet,
    fusion: FusionEngine,
    trend: TrendFilter,
    gate: AgreementGate,
    weights: WeightHandle,
    executor: Arc<dyn ExecutionClient>,
    /// Wall clock bounding the cycle deadline; tick timestamps only when unset
    clock: Option<Arc<dyn Clock>>,
    risk: Mutex<RiskManager>,
    learning: tokio::sync::Mutex<LearningEngine>,
    cycle: Arc<tokio::sync::Mutex<CycleState>>,
    /// Placed or attempted trades awaiting settlement, by interval start
    outcomes: Mutex<BTreeMap<DateTime<Utc>, TradeOutcome>>,
    state: watch::Sender<OrchestratorState>,
    events: EventBus,
}

impl DecisionOrchestrator {
    /// Assemble an orchestrator from its collaborators. Invalid
    /// configuration is rejected here, before anything runs.
    pub fn new(
        config: StrategyConfig,
        context: ContextFetcher,
        processors: ProcessorSet,
        executor: Arc<dyn ExecutionClient>,
        learning: LearningEngine,
        now: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (state, _) = watch::channel(OrchestratorState::Idle);
        Ok(Self {
            window: TradeWindow::new(config.trade_window_start, config.trade_window_end),
            history: SharedPriceHistory::new(config.max_price_history),
            context,
            processors,
            fusion: FusionEngine::new(config.fusion_min_signals),
            trend: TrendFilter::new(config.trend_up_threshold, config.trend_down_threshold),
            gate: AgreementGate::new(config.require_signal_agreement, config.fusion_min_score),
            weights: learning.weights(),
            executor,
            clock: None,
            risk: Mutex::new(RiskManager::new(&config.risk, now)),
            learning: tokio::sync::Mutex::new(learning),
            cycle: Arc::new(tokio::sync::Mutex::new(CycleState {
                interval: None,
                phase: Phase::Open,
            })),
            outcomes: Mutex::new(BTreeMap::new()),
            state,
            events: EventBus::new(),
            config,
        })
    }

    /// Production wiring: HTTP context providers, all six processors, the
    /// paper executor and file-backed learning state.
    pub async fn from_config(config: StrategyConfig) -> Result<Self> {
        config.validate().context("Invalid strategy configuration")?;

        let context = ContextFetcher::from_settings(&config.providers)
            .context("Failed to build context providers")?;
        let processors = ProcessorSet::from_params(&config.processors);
        let defaults = WeightTable::from_config(&config).context("Invalid default weights")?;
        let store = Arc::new(JsonFileStore::new(config.learning.state_path.clone()));
        let learning = LearningEngine::initialize(config.learning.clone(), defaults, store).await;
        if learning.needs_attention() {
            warn!("Learning state was discarded; running on default weights");
        }

        let orchestrator = Self::new(
            config,
            context,
            processors,
            Arc::new(PaperExecutor::new()),
            learning,
            Utc::now(),
        )?;
        info!(
            processors = orchestrator.processors.len(),
            executor = orchestrator.executor.name(),
            window_start = orchestrator.window.start_seconds,
            window_end = orchestrator.window.end_seconds,
            "Decision orchestrator ready"
        );
        Ok(orchestrator)
    }

    /// Bound every cycle by the window close as seen by `clock` as well as
    /// by the tick's own timestamp, so late-delivered ticks cannot outlive
    /// the real window.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Consume a tick stream. Ticks are appended to the history as they
    /// arrive, so a running cycle never holds up the stream, and a single
    /// worker evaluates the accepted ones in arrival order.
    pub async fn run(self: Arc<Self>, mut ticks: mpsc::Receiver<PriceSample>) {
        let (queue, mut queued) = mpsc::channel::<PriceSample>(EVALUATION_QUEUE);
        let worker = {
            let orchestrator = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some(sample) = queued.recv().await {
                    orchestrator.evaluate(sample).await;
                }
            })
        };

        while let Some(sample) = ticks.recv().await {
            if !self.record_tick(sample) {
                continue;
            }
            if queue.try_send(sample).is_err() {
                debug!(timestamp = %sample.timestamp, "Evaluation queue full; tick recorded only");
            }
        }

        drop(queue);
        if let Err(e) = worker.await {
            warn!(error = %e, "Evaluation worker stopped");
        }
        info!("Tick stream closed");
    }

    /// Append a tick and evaluate it inline. Ticks the history buffer
    /// rejects (invalid price, out of order) are never evaluated.
    pub async fn on_tick(&self, sample: PriceSample) -> Option<Decision> {
        if !self.record_tick(sample) {
            return None;
        }
        self.evaluate(sample).await
    }

    pub fn record_tick(&self, sample: PriceSample) -> bool {
        let accepted = self.history.push(sample);
        if !accepted {
            debug!(timestamp = %sample.timestamp, price = sample.price, "Tick rejected by history buffer");
        }
        accepted
    }

    /// Advance the interval state machine for a tick accepted by the buffer.
    /// A tick arriving while another cycle is in flight is a no-op, and a
    /// tick from an interval older than the current one never reopens it.
    ///
    /// Window membership follows the tick timestamp. The cycle deadline is
    /// the earlier of the window close measured from the tick and from the
    /// injected clock, when there is one.
    async fn evaluate(&self, sample: PriceSample) -> Option<Decision> {
        let now = sample.timestamp;
        let interval = MarketInterval::containing(now, self.config.market_interval_seconds);

        let Ok(mut cycle) = Arc::clone(&self.cycle).try_lock_owned() else {
            debug!(timestamp = %now, "Decision cycle in flight; tick not evaluated");
            return None;
        };

        if let Some(current) = cycle.interval {
            if interval.start < current.start {
                debug!(
                    timestamp = %now,
                    interval = %interval.start,
                    current = %current.start,
                    "Tick from an earlier interval ignored"
                );
                return None;
            }
        }

        let mut closed = None;
        if cycle.interval != Some(interval) {
            if let Some(previous) = cycle.interval {
                closed = self.close_interval(&mut cycle, previous);
            }
            cycle.interval = Some(interval);
            cycle.phase = Phase::Open;
        }

        if !self.window.contains(&interval, now) {
            if self.window.has_closed(&interval, now) {
                return self.close_interval(&mut cycle, interval).or(closed);
            }
            self.set_state(OrchestratorState::AwaitingWindow);
            return closed;
        }

        let mut remaining = self.window.remaining(&interval, now);
        if let Some(clock) = &self.clock {
            remaining = remaining.min(self.window.remaining(&interval, clock.now()));
        }
        if remaining.is_zero() {
            warn!(
                interval = %interval.start,
                timestamp = %now,
                "Tick delivered after the trade window closed"
            );
            return match std::mem::replace(&mut cycle.phase, Phase::Decided) {
                Phase::Open => Some(self.apply(
                    &mut cycle,
                    interval,
                    CycleResult::Skip(SkipReason::WindowClosed),
                    now,
                )),
                Phase::AwaitingFill(pending) => {
                    cycle.phase = Phase::AwaitingFill(pending);
                    self.close_interval(&mut cycle, interval).or(closed)
                }
                Phase::Decided => closed,
            };
        }

        let work = match std::mem::replace(&mut cycle.phase, Phase::Decided) {
            Phase::Decided => return closed,
            Phase::AwaitingFill(pending) => {
                debug!(trade_id = %pending.intent.trade_id, attempt = pending.attempts + 1, "Retrying execution");
                tokio::time::timeout(remaining, self.submit(pending)).await
            }
            Phase::Open => {
                info!(
                    interval = %interval.start,
                    elapsed = interval.elapsed(now).num_seconds(),
                    price = sample.price,
                    "Trade window entered"
                );
                tokio::time::timeout(remaining, self.decide(interval, sample)).await
            }
        };

        let result = work.unwrap_or_else(|_| {
            warn!(interval = %interval.start, "Trade window closed before the decision completed");
            CycleResult::Skip(SkipReason::WindowClosed)
        });
        Some(self.apply(&mut cycle, interval, result, now))
    }

    /// Pipeline from context fetch to execution for one interval.
    async fn decide(&self, interval: MarketInterval, sample: PriceSample) -> CycleResult {
        let now = sample.timestamp;
        let history = self.history.snapshot();
        if history.len() < self.config.min_price_history {
            return CycleResult::Skip(SkipReason::InsufficientHistory {
                have: history.len(),
                need: self.config.min_price_history,
            });
        }

        self.set_state(OrchestratorState::FetchingContext);
        let context = self.context.fetch().await;
        if let Some(stats) = PriceStats::compute(sample.price, &history) {
            info!(
                price = sample.price,
                sma_20 = stats.sma_20,
                deviation = stats.deviation,
                momentum = stats.momentum,
                volatility = stats.volatility,
                "Price statistics"
            );
        }

        self.set_state(OrchestratorState::Fusing);
        let weights = self.weights.current();
        let input = ProcessorInput {
            current_price: sample.price,
            history: &history,
            context: &context,
            now,
        };
        let signals = self.processors.run(&input);
        let fusion = self.fusion.fuse(&signals, &weights);
        info!(
            signals = signals.len(),
            direction = ?fusion.direction,
            score = fusion.score,
            weights_version = fusion.weights_version,
            "Signals fused"
        );

        self.set_state(OrchestratorState::Gating);
        let trend = self.trend.classify(sample.price);
        let direction = match self.gate.gate(&trend, &fusion) {
            GateOutcome::Proceed(direction) => direction,
            GateOutcome::Skip(rejection) => return CycleResult::Skip(SkipReason::Gate(rejection)),
        };

        self.set_state(OrchestratorState::RiskCheck);
        let intent = TradeIntent {
            trade_id: Uuid::new_v4(),
            instrument: interval.instrument(&self.config.market_slug_prefix),
            interval_start: interval.start,
            direction,
            size_usd: self.config.position_size_usd,
            reference_price: sample.price,
            created_at: now,
        };
        let decision = self.risk().check_trade(&intent, now);
        if let Some(rejection) = decision.reason {
            return CycleResult::Skip(SkipReason::Risk(rejection));
        }

        let snapshots: Vec<SignalSnapshot> = signals.iter().map(Signal::snapshot).collect();
        self.events.publish(DecisionEvent::IntentSubmitted {
            intent: intent.clone(),
            trend,
            fusion,
            signals: snapshots.clone(),
        });

        self.submit(PendingTrade {
            intent,
            signals: snapshots,
            attempts: 0,
            last_failure: String::new(),
        })
        .await
    }

    async fn submit(&self, mut pending: PendingTrade) -> CycleResult {
        self.set_state(OrchestratorState::Executing);
        pending.attempts += 1;

        let report = match self.executor.execute(&pending.intent).await {
            Ok(report) => report,
            Err(e) => ExecutionReport::rejected(format!("{:#}", e)),
        };
        if report.filled {
            CycleResult::Filled(pending, report)
        } else {
            pending.last_failure = report
                .failure_reason
                .unwrap_or_else(|| "not filled".to_string());
            CycleResult::Unfilled(pending)
        }
    }

    fn apply(
        &self,
        cycle: &mut CycleState,
        interval: MarketInterval,
        result: CycleResult,
        now: DateTime<Utc>,
    ) -> Decision {
        match result {
            CycleResult::Skip(reason) => {
                cycle.phase = Phase::Decided;
                self.skip(&interval, reason.clone());
                Decision::Skipped(reason)
            }
            CycleResult::Filled(pending, report) => {
                let intent = pending.intent;
                let price = report
                    .fill_price
                    .unwrap_or_else(|| intent.direction.token_price(intent.reference_price));
                self.risk().record_fill(&intent, price, now);
                self.store_outcome(
                    interval.start,
                    TradeOutcome::pending(&intent, &report, pending.signals),
                );
                info!(
                    trade_id = %intent.trade_id,
                    instrument = %intent.instrument,
                    direction = %intent.direction,
                    size = %intent.size_usd,
                    price,
                    attempts = pending.attempts,
                    "Decision: TRADE"
                );
                self.events.publish(DecisionEvent::Filled {
                    trade_id: intent.trade_id,
                    interval_start: interval.start,
                    price,
                });
                cycle.phase = Phase::Decided;
                self.set_state(OrchestratorState::Idle);
                Decision::Traded { intent, report }
            }
            CycleResult::Unfilled(pending) => {
                warn!(
                    trade_id = %pending.intent.trade_id,
                    attempt = pending.attempts,
                    reason = %pending.last_failure,
                    "Execution not filled; will retry while the window is open"
                );
                self.events.publish(DecisionEvent::ExecutionFailed {
                    trade_id: pending.intent.trade_id,
                    interval_start: interval.start,
                    attempt: pending.attempts,
                    reason: pending.last_failure.clone(),
                });
                let decision = Decision::AwaitingFill {
                    intent: pending.intent.clone(),
                    reason: pending.last_failure.clone(),
                };
                cycle.phase = Phase::AwaitingFill(pending);
                self.set_state(OrchestratorState::Idle);
                decision
            }
        }
    }

    /// Finish an interval whose window has closed. An approved trade that
    /// never filled is kept as an unfilled outcome for learning.
    fn close_interval(&self, cycle: &mut CycleState, interval: MarketInterval) -> Option<Decision> {
        match std::mem::replace(&mut cycle.phase, Phase::Decided) {
            Phase::AwaitingFill(pending) => {
                let report = ExecutionReport::rejected(pending.last_failure.clone());
                self.store_outcome(
                    interval.start,
                    TradeOutcome::pending(&pending.intent, &report, pending.signals),
                );
                let reason = SkipReason::NotFilled {
                    reason: pending.last_failure,
                };
                self.skip(&interval, reason.clone());
                Some(Decision::Skipped(reason))
            }
            Phase::Open => {
                debug!(interval = %interval.start, "Window passed without an in-window tick");
                self.set_state(OrchestratorState::Idle);
                None
            }
            Phase::Decided => {
                self.set_state(OrchestratorState::Idle);
                None
            }
        }
    }

    fn skip(&self, interval: &MarketInterval, reason: SkipReason) {
        info!(
            interval = %interval.start,
            reason = reason.code(),
            detail = %reason,
            "Decision: SKIP"
        );
        self.set_state(OrchestratorState::Skipped);
        self.events.publish(DecisionEvent::Skipped {
            interval_start: interval.start,
            instrument: interval.instrument(&self.config.market_slug_prefix),
            reason,
        });
    }

    fn store_outcome(&self, interval_start: DateTime<Utc>, outcome: TradeOutcome) {
        lock(&self.outcomes).insert(interval_start, outcome);
    }

    /// Settle the trade placed (or attempted) in an interval, update the
    /// account book and feed the learning engine.
    pub async fn settle_interval(
        &self,
        interval_start: DateTime<Utc>,
        resolution: MarketResolution,
        at: DateTime<Utc>,
    ) -> Option<TradeOutcome> {
        {
            let mut cycle = self.cycle.lock().await;
            if let Some(interval) = cycle.interval.filter(|i| i.start == interval_start) {
                if matches!(cycle.phase, Phase::AwaitingFill(_)) {
                    self.close_interval(&mut cycle, interval);
                }
            }
        }

        let mut outcome = lock(&self.outcomes).remove(&interval_start)?;
        if let Err(e) = outcome.settle(resolution, at) {
            warn!(error = %e, "Outcome already settled");
            return None;
        }
        info!(
            trade_id = %outcome.trade_id,
            instrument = %outcome.instrument,
            resolution = ?resolution,
            settlement = ?outcome.settlement,
            filled = outcome.filled,
            pnl = %outcome.pnl,
            "Interval settled"
        );

        self.risk().record_settlement(&outcome, at);
        {
            let mut learning = self.learning.lock().await;
            learning.record_outcome(outcome.clone());
            learning.maybe_optimize(at).await;
        }
        self.events.publish(DecisionEvent::Settled {
            outcome: outcome.clone(),
        });
        Some(outcome)
    }

    /// Intervals with a trade awaiting settlement
    pub fn unsettled_intervals(&self) -> Vec<DateTime<Utc>> {
        lock(&self.outcomes).keys().copied().collect()
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DecisionEvent> {
        self.events.subscribe()
    }

    pub fn weights(&self) -> WeightHandle {
        self.weights.clone()
    }

    pub fn account(&self, now: DateTime<Utc>) -> AccountSnapshot {
        self.risk().snapshot(now)
    }

    pub fn learning(&self) -> &tokio::sync::Mutex<LearningEngine> {
        &self.learning
    }

    pub fn history(&self) -> &SharedPriceHistory {
        &self.history
    }

    fn set_state(&self, state: OrchestratorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Orchestrator state");
        }
    }

    fn risk(&self) -> MutexGuard<'_, RiskManager> {
        lock(&self.risk)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
