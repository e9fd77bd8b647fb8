// End-to-end decision scenarios through the orchestrator with injected
// processors, providers, executors and learning stores.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{
    default_weight_table, ExecutionReport, MarketResolution, PriceSample, ProcessorId, Signal,
    SignalDirection, SignalStrength, StrategyConfig, TradeDirection, TradeIntent,
};
use data_ingestion::{ContextFetcher, ContextProvider, SpotQuote};
use execution::{
    Clock, Decision, DecisionEvent, DecisionOrchestrator, ExecutionClient, PaperExecutor,
    SkipReason,
};
use monitoring::{InMemoryStore, JsonFileStore, LearningEngine, LearningStateStore};
use portfolio_risk::RiskRejection;
use rust_decimal_macros::dec;
use signal_generation::{GateRejection, ProcessorInput, ProcessorSet, SignalProcessor, WeightTable};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Emits the same opinion every cycle.
struct FixedProcessor {
    id: ProcessorId,
    direction: SignalDirection,
    strength: SignalStrength,
    confidence: f64,
}

impl SignalProcessor for FixedProcessor {
    fn id(&self) -> ProcessorId {
        self.id
    }

    fn process(&self, input: &ProcessorInput<'_>) -> Option<Signal> {
        Some(Signal::new(
            self.id,
            self.direction,
            self.strength,
            self.confidence,
            input.now,
        ))
    }
}

fn fixed(
    id: ProcessorId,
    direction: SignalDirection,
    strength: SignalStrength,
    confidence: f64,
) -> Box<dyn SignalProcessor> {
    Box::new(FixedProcessor {
        id,
        direction,
        strength,
        confidence,
    })
}

/// Spot feed that answers only after `delay`.
struct SlowSpot {
    delay: std::time::Duration,
}

#[async_trait]
impl ContextProvider<SpotQuote> for SlowSpot {
    fn name(&self) -> &'static str {
        "slow-spot"
    }

    async fn fetch(&self) -> Result<SpotQuote> {
        tokio::time::sleep(self.delay).await;
        Ok(SpotQuote {
            price: 97_000.0,
            momentum: None,
            timestamp: Utc::now(),
        })
    }
}

/// Never fills; counts attempts.
#[derive(Default)]
struct NoLiquidity {
    attempts: AtomicU32,
}

#[async_trait]
impl ExecutionClient for NoLiquidity {
    fn name(&self) -> &'static str {
        "no-liquidity"
    }

    async fn execute(&self, _intent: &TradeIntent) -> Result<ExecutionReport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionReport::rejected("no matching liquidity"))
    }
}

/// Wall clock stuck at one instant.
#[derive(Debug)]
struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn day_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()
}

/// Start of the k-th 15-minute interval after 12:00 UTC
fn interval(k: i64) -> DateTime<Utc> {
    day_start() + Duration::hours(12) + Duration::minutes(15 * k)
}

fn tick(start: DateTime<Utc>, secs: i64, price: f64) -> PriceSample {
    PriceSample::new(start + Duration::seconds(secs), price)
}

fn all_six(direction: SignalDirection) -> Vec<Box<dyn SignalProcessor>> {
    ProcessorId::ALL
        .iter()
        .map(|id| fixed(*id, direction, SignalStrength::Strong, 0.8))
        .collect()
}

struct Harness {
    config: StrategyConfig,
    processors: Vec<Box<dyn SignalProcessor>>,
    context: ContextFetcher,
    executor: Arc<dyn ExecutionClient>,
    store: Arc<dyn LearningStateStore>,
    clock: Option<Arc<dyn Clock>>,
}

impl Harness {
    fn new(processors: Vec<Box<dyn SignalProcessor>>) -> Self {
        Self {
            config: StrategyConfig::default(),
            processors,
            context: ContextFetcher::new(std::time::Duration::from_secs(2)),
            executor: Arc::new(PaperExecutor::new()),
            store: Arc::new(InMemoryStore::new()),
            clock: None,
        }
    }

    async fn build(self) -> DecisionOrchestrator {
        let defaults = WeightTable::from_config(&self.config).unwrap();
        let learning =
            LearningEngine::initialize(self.config.learning.clone(), defaults, self.store).await;
        let orchestrator = DecisionOrchestrator::new(
            self.config,
            self.context,
            ProcessorSet::new(self.processors),
            self.executor,
            learning,
            interval(0),
        )
        .unwrap();
        match self.clock {
            Some(clock) => orchestrator.with_clock(clock),
            None => orchestrator,
        }
    }
}

/// Twenty ticks before the window of the interval starting at `start`.
async fn warm_up(orchestrator: &DecisionOrchestrator, start: DateTime<Utc>, price: f64) {
    for i in 0..20 {
        assert_eq!(orchestrator.on_tick(tick(start, 700 + i, price)).await, None);
    }
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<DecisionEvent>) -> Vec<DecisionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test]
async fn test_scenario_a_unanimous_bullish_trades_yes() {
    let orchestrator = Harness::new(all_six(SignalDirection::Bullish)).build().await;
    let mut events = orchestrator.subscribe();
    warm_up(&orchestrator, interval(0), 0.65).await;

    let decision = orchestrator.on_tick(tick(interval(0), 780, 0.65)).await.unwrap();
    let Decision::Traded { intent, report } = decision else {
        panic!("expected a trade, got {:?}", decision);
    };
    assert_eq!(intent.direction, TradeDirection::BuyYes);
    assert_eq!(intent.size_usd, dec!(1.00));
    assert_eq!(intent.instrument, format!("btc-updown-15m-{}", interval(0).timestamp()));
    assert!(report.filled);

    let submitted = drain(&mut events)
        .into_iter()
        .find_map(|event| match event {
            DecisionEvent::IntentSubmitted { fusion, signals, .. } => Some((fusion, signals)),
            _ => None,
        })
        .unwrap();
    assert_eq!(submitted.0.direction, SignalDirection::Bullish);
    assert!(submitted.0.score > 40.0);
    assert!((submitted.0.score - 60.0).abs() < 1e-9);
    assert_eq!(submitted.1.len(), 6);
}

#[tokio::test]
async fn test_scenario_b_no_trend_never_trades() {
    let executor = Arc::new(PaperExecutor::new());
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.executor = executor.clone();
    let orchestrator = harness.build().await;
    warm_up(&orchestrator, interval(0), 0.50).await;

    let decision = orchestrator.on_tick(tick(interval(0), 780, 0.50)).await;
    assert_eq!(
        decision,
        Some(Decision::Skipped(SkipReason::Gate(GateRejection::NoTrend)))
    );
    assert!(executor.fills().is_empty());
    assert!(orchestrator.unsettled_intervals().is_empty());
}

#[tokio::test]
async fn test_scenario_c_split_signals_skip_on_disagreement() {
    let mut processors = Vec::new();
    for (i, id) in ProcessorId::ALL.iter().enumerate() {
        let direction = if i % 2 == 0 {
            SignalDirection::Bullish
        } else {
            SignalDirection::Bearish
        };
        processors.push(fixed(*id, direction, SignalStrength::Strong, 0.8));
    }
    let mut harness = Harness::new(processors);
    harness.config.weights = ProcessorId::ALL
        .iter()
        .map(|id| (id.as_str().to_string(), 1.0 / 6.0))
        .collect();
    let orchestrator = harness.build().await;
    warm_up(&orchestrator, interval(0), 0.35).await;

    let decision = orchestrator.on_tick(tick(interval(0), 785, 0.35)).await.unwrap();
    let Decision::Skipped(SkipReason::Gate(GateRejection::Disagreement { fusion, score, .. })) =
        decision
    else {
        panic!("expected disagreement, got {:?}", decision);
    };
    assert_eq!(fusion, SignalDirection::Neutral);
    assert_eq!(score, 0.0);
}

#[tokio::test]
async fn test_scenario_d_daily_loss_limit_until_reset() {
    let orchestrator = Harness::new(all_six(SignalDirection::Bullish)).build().await;
    warm_up(&orchestrator, interval(0), 0.65).await;

    // Five $1 losses exhaust the $5 daily budget
    for k in 0..5 {
        let decision = orchestrator.on_tick(tick(interval(k), 780, 0.65)).await.unwrap();
        assert!(matches!(decision, Decision::Traded { .. }), "interval {}", k);
        let outcome = orchestrator
            .settle_interval(interval(k), MarketResolution::Down, interval(k + 1))
            .await
            .unwrap();
        assert_eq!(outcome.pnl, dec!(-1.00));
    }
    assert_eq!(orchestrator.account(interval(5)).daily_realized_pnl, dec!(-5.00));

    for k in 5..8 {
        let decision = orchestrator.on_tick(tick(interval(k), 790, 0.65)).await;
        assert!(
            matches!(
                decision,
                Some(Decision::Skipped(SkipReason::Risk(RiskRejection::DailyLossLimit { .. })))
            ),
            "interval {}: {:?}",
            k,
            decision
        );
    }

    // Trading resumes after the 00:00 UTC boundary
    let next_day = day_start() + Duration::days(1);
    let decision = orchestrator.on_tick(tick(next_day, 780, 0.65)).await.unwrap();
    assert!(matches!(decision, Decision::Traded { .. }));
    assert_eq!(orchestrator.account(next_day).daily_realized_pnl, dec!(0));
}

#[tokio::test]
async fn test_scenario_e_learning_rewards_the_right_processor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("learning_state.json");

    let mut harness = Harness::new(vec![
        fixed(
            ProcessorId::SpikeDetection,
            SignalDirection::Bullish,
            SignalStrength::Moderate,
            0.7,
        ),
        fixed(
            ProcessorId::OrderBookImbalance,
            SignalDirection::Bearish,
            SignalStrength::Moderate,
            0.7,
        ),
    ]);
    // Fusion leans bearish on the default weights; trend alone drives the trade
    harness.config.require_signal_agreement = false;
    harness.config.learning.state_path = path.clone();
    harness.store = Arc::new(JsonFileStore::new(&path));
    let orchestrator = harness.build().await;
    let before = orchestrator.weights().current();
    warm_up(&orchestrator, interval(0), 0.65).await;

    for k in 0..10 {
        let decision = orchestrator.on_tick(tick(interval(k), 780, 0.65)).await.unwrap();
        assert!(matches!(decision, Decision::Traded { .. }), "interval {}", k);
        orchestrator
            .settle_interval(interval(k), MarketResolution::Up, interval(k + 1))
            .await
            .unwrap();
    }

    let after = orchestrator.weights().current();
    assert_eq!(after.version, before.version + 1);
    assert!(after.weight(ProcessorId::SpikeDetection) > before.weight(ProcessorId::SpikeDetection));
    assert!(
        after.weight(ProcessorId::OrderBookImbalance)
            < before.weight(ProcessorId::OrderBookImbalance)
    );
    assert!((after.weight(ProcessorId::SpikeDetection) - 0.1368).abs() < 1e-9);
    assert!((after.weight(ProcessorId::OrderBookImbalance) - 0.258).abs() < 1e-9);
    assert!(after.sum() <= 1.0 + 1e-9);
    for weight in after.weights.values() {
        assert!((0.05..=0.50).contains(weight));
    }
    assert_eq!(orchestrator.learning().lock().await.trades_since_last_optimization(), 0);

    // A restart picks up the learned table
    let config = StrategyConfig::default();
    let reloaded = LearningEngine::initialize(
        config.learning.clone(),
        WeightTable::new(default_weight_table()),
        Arc::new(JsonFileStore::new(&path)),
    )
    .await;
    assert_eq!(reloaded.weights().current().weights, after.weights);
    assert_eq!(reloaded.weights().current().version, after.version);
}

#[tokio::test(start_paused = true)]
async fn test_window_close_abandons_in_flight_cycle() {
    let executor = Arc::new(PaperExecutor::new());
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.executor = executor.clone();
    // Provider timeout longer than the window: only the window deadline can end the wait
    harness.context = ContextFetcher::new(std::time::Duration::from_secs(600)).with_spot(Arc::new(
        SlowSpot {
            delay: std::time::Duration::from_secs(120),
        },
    ));
    let orchestrator = harness.build().await;
    warm_up(&orchestrator, interval(0), 0.65).await;

    let decision = orchestrator.on_tick(tick(interval(0), 780, 0.65)).await;
    assert_eq!(decision, Some(Decision::Skipped(SkipReason::WindowClosed)));
    assert!(executor.fills().is_empty());
    assert_eq!(orchestrator.on_tick(tick(interval(0), 800, 0.65)).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_slow_provider_times_out_without_blocking_cycle() {
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.context = ContextFetcher::new(std::time::Duration::from_secs(2)).with_spot(Arc::new(
        SlowSpot {
            delay: std::time::Duration::from_secs(30),
        },
    ));
    let orchestrator = harness.build().await;
    warm_up(&orchestrator, interval(0), 0.65).await;

    let decision = orchestrator.on_tick(tick(interval(0), 780, 0.65)).await.unwrap();
    assert!(matches!(decision, Decision::Traded { .. }));
}

#[tokio::test]
async fn test_non_fill_retried_then_recorded_at_close() {
    let executor = Arc::new(NoLiquidity::default());
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.executor = executor.clone();
    let orchestrator = harness.build().await;
    warm_up(&orchestrator, interval(0), 0.65).await;

    for secs in [780, 790, 800] {
        let decision = orchestrator.on_tick(tick(interval(0), secs, 0.65)).await;
        assert!(matches!(decision, Some(Decision::AwaitingFill { .. })));
    }
    assert_eq!(executor.attempts.load(Ordering::SeqCst), 3);

    // First tick of the next interval closes the old one
    let closed = orchestrator.on_tick(tick(interval(1), 10, 0.65)).await;
    assert!(matches!(closed, Some(Decision::Skipped(SkipReason::NotFilled { .. }))));
    assert_eq!(executor.attempts.load(Ordering::SeqCst), 3);

    let outcome = orchestrator
        .settle_interval(interval(0), MarketResolution::Up, interval(1))
        .await
        .unwrap();
    assert!(!outcome.filled);
    assert_eq!(outcome.pnl, dec!(0));
    assert_eq!(orchestrator.account(interval(1)).balance, dec!(1000.00));
}

#[tokio::test(start_paused = true)]
async fn test_second_trigger_while_in_flight_is_noop() {
    let executor = Arc::new(PaperExecutor::new());
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.executor = executor.clone();
    harness.context = ContextFetcher::new(std::time::Duration::from_secs(10)).with_spot(Arc::new(
        SlowSpot {
            delay: std::time::Duration::from_secs(5),
        },
    ));
    let orchestrator = harness.build().await;
    warm_up(&orchestrator, interval(0), 0.65).await;

    let (first, second) = tokio::join!(
        orchestrator.on_tick(tick(interval(0), 780, 0.65)),
        orchestrator.on_tick(tick(interval(0), 781, 0.66)),
    );
    assert!(matches!(first, Some(Decision::Traded { .. })));
    assert_eq!(second, None);
    assert_eq!(executor.fills().len(), 1);
    assert_eq!(orchestrator.history().len(), 22);
}

#[tokio::test]
async fn test_run_consumes_tick_stream() {
    let executor = Arc::new(PaperExecutor::new());
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.executor = executor.clone();
    let orchestrator = Arc::new(harness.build().await);
    let mut events = orchestrator.subscribe();

    let (sender, receiver) = tokio::sync::mpsc::channel(64);
    let runner = tokio::spawn(Arc::clone(&orchestrator).run(receiver));
    for i in 0..20 {
        sender.send(tick(interval(0), 700 + i, 0.65)).await.unwrap();
    }
    sender.send(tick(interval(0), 780, 0.65)).await.unwrap();
    drop(sender);
    runner.await.unwrap();

    let filled = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if let Ok(DecisionEvent::Filled { interval_start, .. }) = events.recv().await {
                return interval_start;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(filled, interval(0));
    assert_eq!(executor.fills().len(), 1);
}

#[tokio::test]
async fn test_late_tick_never_reopens_settled_interval() {
    let executor = Arc::new(PaperExecutor::new());
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.executor = executor.clone();
    let orchestrator = harness.build().await;
    warm_up(&orchestrator, interval(0), 0.65).await;

    let decision = orchestrator.on_tick(tick(interval(0), 780, 0.65)).await.unwrap();
    assert!(matches!(decision, Decision::Traded { .. }));
    orchestrator
        .settle_interval(interval(0), MarketResolution::Up, interval(1))
        .await
        .unwrap();
    assert_eq!(orchestrator.on_tick(tick(interval(0), 905, 0.65)).await, None);

    // Delivered after the next interval began
    assert_eq!(orchestrator.on_tick(tick(interval(0), 800, 0.65)).await, None);
    assert_eq!(executor.fills().len(), 1);
    assert!(orchestrator.unsettled_intervals().is_empty());
    assert_eq!(orchestrator.account(interval(1)).open_positions, 0);
}

#[tokio::test]
async fn test_out_of_order_tick_in_window_is_ignored() {
    let executor = Arc::new(PaperExecutor::new());
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.executor = executor.clone();
    let orchestrator = harness.build().await;
    warm_up(&orchestrator, interval(0), 0.50).await;

    assert!(orchestrator.on_tick(tick(interval(0), 779, 0.50)).await.is_none());
    // Older than the last accepted tick, although inside the window
    assert_eq!(orchestrator.on_tick(tick(interval(0), 778, 0.65)).await, None);
    assert_eq!(orchestrator.history().len(), 21);
    assert!(executor.fills().is_empty());

    let decision = orchestrator.on_tick(tick(interval(0), 781, 0.65)).await.unwrap();
    assert!(matches!(decision, Decision::Traded { .. }));
}

#[tokio::test]
async fn test_invalid_price_tick_is_not_evaluated() {
    let executor = Arc::new(PaperExecutor::new());
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.executor = executor.clone();
    let orchestrator = harness.build().await;
    warm_up(&orchestrator, interval(0), 0.65).await;

    assert_eq!(orchestrator.on_tick(tick(interval(0), 780, 1.5)).await, None);
    assert_eq!(orchestrator.on_tick(tick(interval(0), 781, f64::NAN)).await, None);
    assert!(executor.fills().is_empty());
    assert_eq!(orchestrator.history().len(), 20);

    // The window is still open for a valid tick
    let decision = orchestrator.on_tick(tick(interval(0), 782, 0.65)).await.unwrap();
    let Decision::Traded { intent, report } = decision else {
        panic!("expected a trade, got {:?}", decision);
    };
    assert_eq!(intent.reference_price, 0.65);
    assert_eq!(report.fill_price, Some(0.65));
}

#[tokio::test(start_paused = true)]
async fn test_late_delivered_tick_bounded_by_wall_clock() {
    let executor = Arc::new(PaperExecutor::new());
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.executor = executor.clone();
    harness.context = ContextFetcher::new(std::time::Duration::from_secs(120)).with_spot(Arc::new(
        SlowSpot {
            delay: std::time::Duration::from_secs(30),
        },
    ));
    // Tick stamped at window entry, delivered with 10 s of the window left
    harness.clock = Some(Arc::new(FixedClock(interval(0) + Duration::seconds(830))));
    let orchestrator = harness.build().await;
    warm_up(&orchestrator, interval(0), 0.65).await;

    let started = tokio::time::Instant::now();
    let decision = orchestrator.on_tick(tick(interval(0), 780, 0.65)).await;
    assert_eq!(decision, Some(Decision::Skipped(SkipReason::WindowClosed)));
    let waited = started.elapsed();
    assert!(waited >= std::time::Duration::from_secs(10));
    assert!(waited < std::time::Duration::from_secs(30));
    assert!(executor.fills().is_empty());
}

#[tokio::test]
async fn test_tick_delivered_after_wall_clock_close_skips() {
    let executor = Arc::new(PaperExecutor::new());
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.executor = executor.clone();
    harness.clock = Some(Arc::new(FixedClock(interval(0) + Duration::seconds(850))));
    let orchestrator = harness.build().await;
    warm_up(&orchestrator, interval(0), 0.65).await;

    let decision = orchestrator.on_tick(tick(interval(0), 790, 0.65)).await;
    assert_eq!(decision, Some(Decision::Skipped(SkipReason::WindowClosed)));
    assert!(executor.fills().is_empty());
    assert_eq!(orchestrator.on_tick(tick(interval(0), 795, 0.65)).await, None);
}

#[tokio::test]
async fn test_run_ignores_ticks_behind_the_stream() {
    let executor = Arc::new(PaperExecutor::new());
    let mut harness = Harness::new(all_six(SignalDirection::Bullish));
    harness.executor = executor.clone();
    let orchestrator = Arc::new(harness.build().await);

    let (sender, receiver) = tokio::sync::mpsc::channel(64);
    let runner = tokio::spawn(Arc::clone(&orchestrator).run(receiver));
    for i in 0..20 {
        sender.send(tick(interval(0), 700 + i, 0.65)).await.unwrap();
    }
    for secs in [780, 905, 800, 906] {
        sender.send(tick(interval(0), secs, 0.65)).await.unwrap();
    }
    sender.send(tick(interval(0), 910, 1.5)).await.unwrap();
    drop(sender);
    runner.await.unwrap();

    assert_eq!(executor.fills().len(), 1);
    assert_eq!(orchestrator.unsettled_intervals(), vec![interval(0)]);
    assert_eq!(orchestrator.history().len(), 23);
}
