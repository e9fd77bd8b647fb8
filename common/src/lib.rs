//! Shared types, configuration and logging for the 15-minute up/down
//! decision core.

pub mod config;
pub mod telemetry;
pub mod types;

pub use config::{
    default_weight_table, ConfigError, DivergenceParams, LearningSettings, OrderBookParams,
    PcrParams, ProcessorParams, ProviderSettings, RiskSettings, SentimentParams, SpikeParams,
    StrategyConfig, TickVelocityParams, WEIGHT_SUM_TOLERANCE,
};
pub use telemetry::{init_logging, LogFormat};
pub use types::{
    ExecutionReport, MarketResolution, OutcomeError, PriceSample, ProcessorId, Settlement, Signal,
    SignalDirection, SignalSnapshot, SignalStrength, TradeDirection, TradeIntent, TradeOutcome,
    UnknownProcessor, MAX_STRENGTH,
};

pub use chrono::{DateTime, Utc};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
