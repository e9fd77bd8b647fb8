//! Shared domain types for the 15-minute up/down decision core

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Highest strength a signal can carry, used to normalise fusion scores.
pub const MAX_STRENGTH: u8 = 4;

/// A single observed market price for the active instrument.
///
/// Prices are probabilities of the YES outcome and live in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl PriceSample {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price }
    }

    /// Whether the price is a finite probability.
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && (0.0..=1.0).contains(&self.price)
    }
}

/// The closed set of signal processors.
///
/// Processor ids double as keys of the persisted weight table, so the
/// serialized names must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessorId {
    OrderBookImbalance,
    TickVelocity,
    PriceDivergence,
    SpikeDetection,
    #[serde(rename = "DeribitPCR")]
    DeribitPcr,
    SentimentAnalysis,
}

impl ProcessorId {
    pub const ALL: [ProcessorId; 6] = [
        ProcessorId::OrderBookImbalance,
        ProcessorId::TickVelocity,
        ProcessorId::PriceDivergence,
        ProcessorId::SpikeDetection,
        ProcessorId::DeribitPcr,
        ProcessorId::SentimentAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorId::OrderBookImbalance => "OrderBookImbalance",
            ProcessorId::TickVelocity => "TickVelocity",
            ProcessorId::PriceDivergence => "PriceDivergence",
            ProcessorId::SpikeDetection => "SpikeDetection",
            ProcessorId::DeribitPcr => "DeribitPCR",
            ProcessorId::SentimentAnalysis => "SentimentAnalysis",
        }
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessorId {
    type Err = UnknownProcessor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessorId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownProcessor(s.to_string()))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown signal processor: {0}")]
pub struct UnknownProcessor(pub String);

/// Directional opinion of a signal or of the fused result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl SignalDirection {
    /// +1 for bullish, -1 for bearish, 0 for neutral.
    pub fn sign(&self) -> f64 {
        match self {
            SignalDirection::Bullish => 1.0,
            SignalDirection::Bearish => -1.0,
            SignalDirection::Neutral => 0.0,
        }
    }
}

/// Signal strength tiers (1..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SignalStrength {
    Weak = 1,
    Moderate = 2,
    Strong = 3,
    VeryStrong = 4,
}

impl SignalStrength {
    pub fn value(&self) -> u8 {
        *self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(SignalStrength::Weak),
            2 => Some(SignalStrength::Moderate),
            3 => Some(SignalStrength::Strong),
            4 => Some(SignalStrength::VeryStrong),
            _ => None,
        }
    }
}

/// An immutable opinion emitted by one processor for one decision cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub processor: ProcessorId,
    pub direction: SignalDirection,
    pub strength: SignalStrength,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl Signal {
    pub fn new(
        processor: ProcessorId,
        direction: SignalDirection,
        strength: SignalStrength,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            processor,
            direction,
            strength,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Combined 0-100 score of strength and confidence, used for logging.
    pub fn score(&self) -> f64 {
        let strength = self.strength.value() as f64 / MAX_STRENGTH as f64;
        (strength * 0.5 + self.confidence * 0.5) * 100.0
    }

    pub fn snapshot(&self) -> SignalSnapshot {
        SignalSnapshot {
            processor: self.processor,
            direction: self.direction,
            strength: self.strength,
            confidence: self.confidence,
        }
    }
}

/// What a processor said at decision time, kept with the trade for attribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub processor: ProcessorId,
    pub direction: SignalDirection,
    pub strength: SignalStrength,
    pub confidence: f64,
}

/// Side of the binary market a trade buys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeDirection {
    BuyYes,
    BuyNo,
}

impl TradeDirection {
    /// The signal direction that agrees with this trade.
    pub fn as_signal_direction(&self) -> SignalDirection {
        match self {
            TradeDirection::BuyYes => SignalDirection::Bullish,
            TradeDirection::BuyNo => SignalDirection::Bearish,
        }
    }

    /// Price of the token actually bought, given the YES price.
    pub fn token_price(&self, yes_price: f64) -> f64 {
        match self {
            TradeDirection::BuyYes => yes_price,
            TradeDirection::BuyNo => 1.0 - yes_price,
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDirection::BuyYes => f.write_str("BUY_YES"),
            TradeDirection::BuyNo => f.write_str("BUY_NO"),
        }
    }
}

/// Which side a 15-minute market resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketResolution {
    Up,
    Down,
}

impl MarketResolution {
    pub fn winning_direction(&self) -> TradeDirection {
        match self {
            MarketResolution::Up => TradeDirection::BuyYes,
            MarketResolution::Down => TradeDirection::BuyNo,
        }
    }
}

/// A request sent to the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub trade_id: Uuid,
    pub instrument: String,
    pub interval_start: DateTime<Utc>,
    pub direction: TradeDirection,
    pub size_usd: Decimal,
    /// YES price observed at window entry
    pub reference_price: f64,
    pub created_at: DateTime<Utc>,
}

/// What the execution collaborator reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub filled: bool,
    pub fill_price: Option<f64>,
    pub failure_reason: Option<String>,
}

impl ExecutionReport {
    pub fn filled(price: f64) -> Self {
        Self {
            filled: true,
            fill_price: Some(price),
            failure_reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            filled: false,
            fill_price: None,
            failure_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Settlement {
    Win,
    Lose,
    Pending,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OutcomeError {
    #[error("trade {0} is already settled")]
    AlreadySettled(Uuid),
}

/// The learning record of one placed (or attempted) trade.
///
/// Created as `Pending` when the trade is placed, settled exactly once, and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub trade_id: Uuid,
    pub instrument: String,
    pub interval_start: DateTime<Utc>,
    pub direction: TradeDirection,
    /// Token price paid (YES price for BuyYes, NO price for BuyNo)
    pub entry_price: f64,
    pub size_usd: Decimal,
    pub filled: bool,
    pub settlement: Settlement,
    pub pnl: Decimal,
    pub signals: Vec<SignalSnapshot>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TradeOutcome {
    pub fn pending(
        intent: &TradeIntent,
        report: &ExecutionReport,
        signals: Vec<SignalSnapshot>,
    ) -> Self {
        let entry_price = report
            .fill_price
            .unwrap_or_else(|| intent.direction.token_price(intent.reference_price));
        Self {
            trade_id: intent.trade_id,
            instrument: intent.instrument.clone(),
            interval_start: intent.interval_start,
            direction: intent.direction,
            entry_price,
            size_usd: intent.size_usd,
            filled: report.filled,
            settlement: Settlement::Pending,
            pnl: Decimal::ZERO,
            signals,
            created_at: intent.created_at,
            settled_at: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settlement != Settlement::Pending
    }

    /// Settle against the market resolution.
    ///
    /// A filled winner is paid `size / entry_price` shares at $1, a filled
    /// loser loses its stake, and an unfilled attempt settles with zero P&L
    /// while still recording whether its direction was right.
    pub fn settle(
        &mut self,
        resolution: MarketResolution,
        at: DateTime<Utc>,
    ) -> Result<(), OutcomeError> {
        if self.is_settled() {
            return Err(OutcomeError::AlreadySettled(self.trade_id));
        }

        let won = resolution.winning_direction() == self.direction;
        self.settlement = if won { Settlement::Win } else { Settlement::Lose };
        self.pnl = if !self.filled {
            Decimal::ZERO
        } else if won {
            let price = Decimal::from_f64(self.entry_price).unwrap_or(Decimal::ONE);
            if price.is_zero() {
                Decimal::ZERO
            } else {
                (self.size_usd / price - self.size_usd).round_dp(6)
            }
        } else {
            -self.size_usd
        };
        self.settled_at = Some(at);
        Ok(())
    }

    /// Which way the market went, derived from the trade side and result.
    pub fn resolution(&self) -> Option<MarketResolution> {
        let up = match (self.settlement, self.direction) {
            (Settlement::Pending, _) => return None,
            (Settlement::Win, TradeDirection::BuyYes) => true,
            (Settlement::Lose, TradeDirection::BuyYes) => false,
            (Settlement::Win, TradeDirection::BuyNo) => false,
            (Settlement::Lose, TradeDirection::BuyNo) => true,
        };
        Some(if up { MarketResolution::Up } else { MarketResolution::Down })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn intent(direction: TradeDirection, price: f64) -> TradeIntent {
        TradeIntent {
            trade_id: Uuid::new_v4(),
            instrument: "btc-updown-15m-0".to_string(),
            interval_start: Utc::now(),
            direction,
            size_usd: dec!(1.00),
            reference_price: price,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_processor_id_round_trip() {
        for id in ProcessorId::ALL {
            assert_eq!(id.as_str().parse::<ProcessorId>().unwrap(), id);
        }
        assert!("Bogus".parse::<ProcessorId>().is_err());
        let json = serde_json::to_string(&ProcessorId::DeribitPcr).unwrap();
        assert_eq!(json, "\"DeribitPCR\"");
    }

    #[test]
    fn test_signal_confidence_is_clamped() {
        let signal = Signal::new(
            ProcessorId::TickVelocity,
            SignalDirection::Bullish,
            SignalStrength::Strong,
            1.7,
            Utc::now(),
        );
        assert_eq!(signal.confidence, 1.0);
    }

    #[test]
    fn test_settle_winning_yes_trade() {
        let intent = intent(TradeDirection::BuyYes, 0.5);
        let mut outcome = TradeOutcome::pending(&intent, &ExecutionReport::filled(0.5), vec![]);
        outcome.settle(MarketResolution::Up, Utc::now()).unwrap();

        assert_eq!(outcome.settlement, Settlement::Win);
        assert_eq!(outcome.pnl, dec!(1.00));
        assert_eq!(outcome.resolution(), Some(MarketResolution::Up));
    }

    #[test]
    fn test_settle_losing_no_trade() {
        let intent = intent(TradeDirection::BuyNo, 0.35);
        let mut outcome = TradeOutcome::pending(&intent, &ExecutionReport::filled(0.65), vec![]);
        outcome.settle(MarketResolution::Up, Utc::now()).unwrap();

        assert_eq!(outcome.settlement, Settlement::Lose);
        assert_eq!(outcome.pnl, dec!(-1.00));
        assert_eq!(outcome.resolution(), Some(MarketResolution::Up));
    }

    #[test]
    fn test_unfilled_trade_settles_without_pnl() {
        let intent = intent(TradeDirection::BuyYes, 0.7);
        let report = ExecutionReport::rejected("no liquidity");
        let mut outcome = TradeOutcome::pending(&intent, &report, vec![]);
        assert_eq!(outcome.entry_price, 0.7);

        outcome.settle(MarketResolution::Up, Utc::now()).unwrap();
        assert_eq!(outcome.settlement, Settlement::Win);
        assert_eq!(outcome.pnl, Decimal::ZERO);
    }

    #[test]
    fn test_outcome_settles_only_once() {
        let intent = intent(TradeDirection::BuyYes, 0.6);
        let mut outcome = TradeOutcome::pending(&intent, &ExecutionReport::filled(0.6), vec![]);
        outcome.settle(MarketResolution::Down, Utc::now()).unwrap();
        let err = outcome.settle(MarketResolution::Up, Utc::now()).unwrap_err();

        assert_eq!(err, OutcomeError::AlreadySettled(intent.trade_id));
        assert_eq!(outcome.settlement, Settlement::Lose);
    }
}
