//! Strategy configuration
//!
//! One explicit structure, checked once at startup. Values come from an
//! optional TOML file layered under `UPDOWN_`-prefixed environment variables
//! (`UPDOWN_TRADE_WINDOW_START=790`, `UPDOWN_RISK__MAX_POSITIONS=3`).

use crate::types::ProcessorId;
use anyhow::Context;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tolerance used when checking that weights sum to at most 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Configuration problems that must stop the process at startup.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("market interval must be positive")]
    ZeroInterval,

    #[error("trade window end ({end}s) must be after start ({start}s)")]
    WindowInverted { start: u64, end: u64 },

    #[error("trade window end ({end}s) exceeds the market interval ({interval}s)")]
    WindowBeyondInterval { end: u64, interval: u64 },

    #[error("trend thresholds inverted or out of range: down={down}, up={up}")]
    ThresholdsInverted { down: f64, up: f64 },

    #[error("fusion minimum score {0} must be within [0, 100]")]
    FusionScoreOutOfRange(f64),

    #[error("position size must be positive, got {0}")]
    NonPositiveSize(Decimal),

    #[error("price history capacity {capacity} is smaller than the minimum history {minimum}")]
    HistoryTooSmall { capacity: usize, minimum: usize },

    #[error("unknown processor in weight table: {0}")]
    UnknownProcessor(String),

    #[error("weight for {processor} is {weight}, outside [{min}, {max}]")]
    WeightOutOfBounds {
        processor: ProcessorId,
        weight: f64,
        min: f64,
        max: f64,
    },

    #[error("weights sum to {0:.4}, which exceeds 1.0")]
    WeightSumExceeded(f64),

    #[error("learning weight bounds invalid: min={min}, max={max}")]
    WeightBoundsInvalid { min: f64, max: f64 },

    #[error("learning rate {0} must be within (0, 1]")]
    LearningRateOutOfRange(f64),

    #[error("learning trigger interval must be positive")]
    ZeroLearningInterval,

    #[error("provider timeout {timeout_ms}ms must be positive and shorter than the trade window ({window_ms}ms)")]
    ProviderTimeout { timeout_ms: u64, window_ms: u64 },

    #[error("invalid risk limit: {0}")]
    RiskLimit(String),
}

/// Complete configuration of the decision core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Length of one market instance in seconds
    #[serde(default = "default_market_interval_seconds")]
    pub market_interval_seconds: u64,

    /// Seconds into the interval at which the decision window opens
    #[serde(default = "default_trade_window_start")]
    pub trade_window_start: u64,

    /// Seconds into the interval at which the decision window closes
    #[serde(default = "default_trade_window_end")]
    pub trade_window_end: u64,

    /// Price at or above which the trend is UP
    #[serde(default = "default_trend_up_threshold")]
    pub trend_up_threshold: f64,

    /// Price at or below which the trend is DOWN
    #[serde(default = "default_trend_down_threshold")]
    pub trend_down_threshold: f64,

    /// Require the fused direction to match the trend before trading
    #[serde(default = "default_require_signal_agreement")]
    pub require_signal_agreement: bool,

    /// Fewer signals than this force a NEUTRAL fusion result
    #[serde(default = "default_fusion_min_signals")]
    pub fusion_min_signals: usize,

    /// Fusion scores below this count as NEUTRAL for the agreement gate
    #[serde(default = "default_fusion_min_score")]
    pub fusion_min_score: f64,

    /// Fixed USD size of every trade
    #[serde(default = "default_position_size_usd")]
    pub position_size_usd: Decimal,

    /// Instrument key prefix; the interval start is appended
    #[serde(default = "default_market_slug_prefix")]
    pub market_slug_prefix: String,

    /// Capacity of the price history buffer
    #[serde(default = "default_max_price_history")]
    pub max_price_history: usize,

    /// Samples required before a decision is attempted
    #[serde(default = "default_min_price_history")]
    pub min_price_history: usize,

    /// Per-processor default weights, keyed by processor id
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,

    #[serde(default)]
    pub processors: ProcessorParams,

    #[serde(default)]
    pub providers: ProviderSettings,

    #[serde(default)]
    pub risk: RiskSettings,

    #[serde(default)]
    pub learning: LearningSettings,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            market_interval_seconds: default_market_interval_seconds(),
            trade_window_start: default_trade_window_start(),
            trade_window_end: default_trade_window_end(),
            trend_up_threshold: default_trend_up_threshold(),
            trend_down_threshold: default_trend_down_threshold(),
            require_signal_agreement: default_require_signal_agreement(),
            fusion_min_signals: default_fusion_min_signals(),
            fusion_min_score: default_fusion_min_score(),
            position_size_usd: default_position_size_usd(),
            market_slug_prefix: default_market_slug_prefix(),
            max_price_history: default_max_price_history(),
            min_price_history: default_min_price_history(),
            weights: default_weights(),
            processors: ProcessorParams::default(),
            providers: ProviderSettings::default(),
            risk: RiskSettings::default(),
            learning: LearningSettings::default(),
        }
    }
}

fn default_market_interval_seconds() -> u64 {
    900
}

fn default_trade_window_start() -> u64 {
    780
}

fn default_trade_window_end() -> u64 {
    840
}

fn default_trend_up_threshold() -> f64 {
    0.60
}

fn default_trend_down_threshold() -> f64 {
    0.40
}

fn default_require_signal_agreement() -> bool {
    true
}

fn default_fusion_min_signals() -> usize {
    1
}

fn default_fusion_min_score() -> f64 {
    40.0
}

fn default_position_size_usd() -> Decimal {
    dec!(1.00)
}

fn default_market_slug_prefix() -> String {
    "btc-updown-15m".to_string()
}

fn default_max_price_history() -> usize {
    500
}

fn default_min_price_history() -> usize {
    20
}

fn default_weights() -> BTreeMap<String, f64> {
    default_weight_table()
        .into_iter()
        .map(|(id, weight)| (id.as_str().to_string(), weight))
        .collect()
}

/// Production default weights; they sum to exactly 1.0.
pub fn default_weight_table() -> BTreeMap<ProcessorId, f64> {
    BTreeMap::from([
        (ProcessorId::OrderBookImbalance, 0.30),
        (ProcessorId::TickVelocity, 0.25),
        (ProcessorId::PriceDivergence, 0.18),
        (ProcessorId::SpikeDetection, 0.12),
        (ProcessorId::DeribitPcr, 0.10),
        (ProcessorId::SentimentAnalysis, 0.05),
    ])
}

impl StrategyConfig {
    /// Load from an optional TOML file plus environment overrides, then validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("UPDOWN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble strategy configuration")?;

        let config: StrategyConfig = settings
            .try_deserialize()
            .context("Failed to parse strategy configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: StrategyConfig =
            toml::from_str(content).context("Failed to parse strategy configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize strategy configuration")
    }

    /// Resolved weight table: production defaults overridden by configured entries.
    pub fn weight_table(&self) -> Result<BTreeMap<ProcessorId, f64>, ConfigError> {
        let mut table = default_weight_table();
        for (name, weight) in &self.weights {
            let id = name
                .parse::<ProcessorId>()
                .map_err(|_| ConfigError::UnknownProcessor(name.clone()))?;
            table.insert(id, *weight);
        }
        Ok(table)
    }

    /// Length of the trade window in seconds.
    pub fn window_length_seconds(&self) -> u64 {
        self.trade_window_end.saturating_sub(self.trade_window_start)
    }

    /// Fail fast on any value that would leave behaviour undefined.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market_interval_seconds == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.trade_window_end <= self.trade_window_start {
            return Err(ConfigError::WindowInverted {
                start: self.trade_window_start,
                end: self.trade_window_end,
            });
        }
        if self.trade_window_end > self.market_interval_seconds {
            return Err(ConfigError::WindowBeyondInterval {
                end: self.trade_window_end,
                interval: self.market_interval_seconds,
            });
        }

        let (down, up) = (self.trend_down_threshold, self.trend_up_threshold);
        if !(0.0..=1.0).contains(&down) || !(0.0..=1.0).contains(&up) || down >= up {
            return Err(ConfigError::ThresholdsInverted { down, up });
        }

        if !(0.0..=100.0).contains(&self.fusion_min_score) {
            return Err(ConfigError::FusionScoreOutOfRange(self.fusion_min_score));
        }
        if self.position_size_usd <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveSize(self.position_size_usd));
        }
        if self.max_price_history == 0 || self.max_price_history < self.min_price_history {
            return Err(ConfigError::HistoryTooSmall {
                capacity: self.max_price_history,
                minimum: self.min_price_history,
            });
        }

        self.learning.validate()?;
        let (min, max) = (self.learning.min_weight, self.learning.max_weight);
        let table = self.weight_table()?;
        for (processor, weight) in &table {
            if !weight.is_finite() || *weight < min || *weight > max {
                return Err(ConfigError::WeightOutOfBounds {
                    processor: *processor,
                    weight: *weight,
                    min,
                    max,
                });
            }
        }
        let sum: f64 = table.values().sum();
        if sum > 1.0 + WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSumExceeded(sum));
        }

        let window_ms = self.window_length_seconds() * 1000;
        let timeout_ms = self.providers.timeout_ms;
        if timeout_ms == 0 || timeout_ms >= window_ms {
            return Err(ConfigError::ProviderTimeout {
                timeout_ms,
                window_ms,
            });
        }

        self.risk.validate()
    }
}

/// Tunables of the six signal processors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorParams {
    pub tick_velocity: TickVelocityParams,
    pub order_book: OrderBookParams,
    pub divergence: DivergenceParams,
    pub spike: SpikeParams,
    pub deribit_pcr: PcrParams,
    pub sentiment: SentimentParams,
}

impl Default for ProcessorParams {
    fn default() -> Self {
        Self {
            tick_velocity: TickVelocityParams::default(),
            order_book: OrderBookParams::default(),
            divergence: DivergenceParams::default(),
            spike: SpikeParams::default(),
            deribit_pcr: PcrParams::default(),
            sentiment: SentimentParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickVelocityParams {
    /// Relative move over 60 seconds that counts as momentum
    pub threshold_60s: f64,
    /// Relative move over 30 seconds that counts as momentum
    pub threshold_30s: f64,
    /// Maximum distance between a lookback target and the tick used for it
    pub tolerance_seconds: f64,
    pub min_ticks: usize,
    pub min_confidence: f64,
}

impl Default for TickVelocityParams {
    fn default() -> Self {
        Self {
            threshold_60s: 0.015,
            threshold_30s: 0.010,
            tolerance_seconds: 15.0,
            min_ticks: 5,
            min_confidence: 0.55,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderBookParams {
    pub imbalance_threshold: f64,
    /// Share of total depth a single level needs to count as a wall
    pub wall_threshold: f64,
    /// Books thinner than this (USD) are ignored
    pub min_book_volume: f64,
    pub top_levels: usize,
    pub min_confidence: f64,
}

impl Default for OrderBookParams {
    fn default() -> Self {
        Self {
            imbalance_threshold: 0.30,
            wall_threshold: 0.20,
            min_book_volume: 50.0,
            top_levels: 10,
            min_confidence: 0.55,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceParams {
    /// Spot move that counts as meaningful momentum
    pub momentum_threshold: f64,
    /// Market price at or above which the move is faded
    pub extreme_prob_threshold: f64,
    /// Market price at or below which the move is faded
    pub low_prob_threshold: f64,
    pub min_confidence: f64,
}

impl Default for DivergenceParams {
    fn default() -> Self {
        Self {
            momentum_threshold: 0.003,
            extreme_prob_threshold: 0.68,
            low_prob_threshold: 0.32,
            min_confidence: 0.55,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeParams {
    /// Relative deviation from the moving average that counts as a spike
    pub spike_threshold: f64,
    pub lookback_periods: usize,
    pub min_confidence: f64,
}

impl Default for SpikeParams {
    fn default() -> Self {
        Self {
            spike_threshold: 0.05,
            lookback_periods: 20,
            min_confidence: 0.55,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PcrParams {
    /// Put/call ratio at or above which the crowd is fearful
    pub bullish_pcr_threshold: f64,
    /// Put/call ratio at or below which the crowd is greedy
    pub bearish_pcr_threshold: f64,
    pub min_confidence: f64,
}

impl Default for PcrParams {
    fn default() -> Self {
        Self {
            bullish_pcr_threshold: 1.20,
            bearish_pcr_threshold: 0.70,
            min_confidence: 0.55,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentParams {
    pub extreme_fear_threshold: f64,
    pub extreme_greed_threshold: f64,
    pub min_confidence: f64,
}

impl Default for SentimentParams {
    fn default() -> Self {
        Self {
            extreme_fear_threshold: 25.0,
            extreme_greed_threshold: 75.0,
            min_confidence: 0.50,
        }
    }
}

/// Endpoints and limits of the context providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Per-provider fetch timeout
    pub timeout_ms: u64,
    pub spot_url: String,
    pub fear_greed_url: String,
    pub news_url: String,
    /// News sentiment is only fetched when a key is configured
    pub news_api_key: Option<String>,
    pub deribit_url: String,
    /// Options with at most this many days to expiry count as short-dated
    pub deribit_max_dte: i64,
    /// Strikes with less open interest are ignored
    pub deribit_min_open_interest: f64,
    pub deribit_cache_seconds: u64,
    pub clob_url: String,
    /// YES token of the active market; without it the order book is not fetched
    pub yes_token_id: Option<String>,
    /// Spot readings kept for momentum
    pub spot_history: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            spot_url: "https://api.exchange.coinbase.com/products/BTC-USD/ticker".to_string(),
            fear_greed_url: "https://api.alternative.me/fng/".to_string(),
            news_url: "https://cryptopanic.com/api/v1/posts/".to_string(),
            news_api_key: None,
            deribit_url: "https://www.deribit.com/api/v2/public/get_book_summary_by_currency"
                .to_string(),
            deribit_max_dte: 2,
            deribit_min_open_interest: 100.0,
            deribit_cache_seconds: 300,
            clob_url: "https://clob.polymarket.com".to_string(),
            yes_token_id: None,
            spot_history: 10,
        }
    }
}

/// Capital-safety limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    /// Maximum number of concurrently open positions
    pub max_positions: usize,
    /// Realized loss per day after which trading stops (USD)
    pub daily_loss_limit: Decimal,
    /// Drawdown from the daily high-water mark that stops trading
    pub max_drawdown_pct: f64,
    /// Account value the drawdown is measured against at startup
    pub starting_balance: Decimal,
    /// Hour (UTC) at which daily counters are reset
    pub daily_reset_hour_utc: u32,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_positions: 5,
            daily_loss_limit: dec!(5.00),
            max_drawdown_pct: 0.15,
            starting_balance: dec!(1000.00),
            daily_reset_hour_utc: 0,
        }
    }
}

impl RiskSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_positions == 0 {
            return Err(ConfigError::RiskLimit("max_positions must be positive".into()));
        }
        if self.daily_loss_limit <= Decimal::ZERO {
            return Err(ConfigError::RiskLimit("daily_loss_limit must be positive".into()));
        }
        if !(self.max_drawdown_pct > 0.0 && self.max_drawdown_pct <= 1.0) {
            return Err(ConfigError::RiskLimit(format!(
                "max_drawdown_pct {} must be within (0, 1]",
                self.max_drawdown_pct
            )));
        }
        if self.starting_balance <= Decimal::ZERO {
            return Err(ConfigError::RiskLimit("starting_balance must be positive".into()));
        }
        if self.daily_reset_hour_utc >= 24 {
            return Err(ConfigError::RiskLimit(format!(
                "daily_reset_hour_utc {} must be below 24",
                self.daily_reset_hour_utc
            )));
        }
        Ok(())
    }
}

/// Outcome-driven weight learning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningSettings {
    pub learning_rate: f64,
    /// Recorded trades between weight recomputations
    pub learning_trigger_interval: usize,
    /// Settled samples a processor needs within a batch before its weight moves
    pub min_processor_samples: usize,
    pub min_weight: f64,
    pub max_weight: f64,
    /// Where the learning state is persisted
    pub state_path: PathBuf,
    /// Weight adjustments kept in memory for reporting
    pub history_limit: usize,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            learning_trigger_interval: 10,
            min_processor_samples: 1,
            min_weight: 0.05,
            max_weight: 0.50,
            state_path: PathBuf::from("learning_state.json"),
            history_limit: 50,
        }
    }
}

impl LearningSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = (self.min_weight, self.max_weight);
        let feasible = min * ProcessorId::ALL.len() as f64 <= 1.0 + WEIGHT_SUM_TOLERANCE;
        if !(min >= 0.0 && min <= max && max <= 1.0) || !feasible {
            return Err(ConfigError::WeightBoundsInvalid { min, max });
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ConfigError::LearningRateOutOfRange(self.learning_rate));
        }
        if self.learning_trigger_interval == 0 {
            return Err(ConfigError::ZeroLearningInterval);
        }
        Ok(())
    }
}
