// Decision Events
// Trade intents, skips and settlements broadcast to observers.

use chrono::{DateTime, Utc};
use common::{SignalSnapshot, TradeIntent, TradeOutcome, Uuid};
use portfolio_risk::RiskRejection;
use serde::{Deserialize, Serialize};
use signal_generation::{FusionResult, GateRejection, TrendDecision};
use std::fmt;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CAPACITY: usize = 256;

/// Why an interval ended without a trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    InsufficientHistory { have: usize, need: usize },
    Gate(GateRejection),
    Risk(RiskRejection),
    /// The window closed before the cycle finished
    WindowClosed,
    /// Approved but never filled before the window closed
    NotFilled { reason: String },
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::InsufficientHistory { .. } => "INSUFFICIENT_HISTORY",
            SkipReason::Gate(GateRejection::NoTrend) => "NO_TREND",
            SkipReason::Gate(GateRejection::Disagreement { .. }) => "DISAGREEMENT",
            SkipReason::Risk(rejection) => rejection.code(),
            SkipReason::WindowClosed => "WINDOW_CLOSED",
            SkipReason::NotFilled { .. } => "NOT_FILLED",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientHistory { have, need } => {
                write!(f, "INSUFFICIENT_HISTORY ({} of {} samples)", have, need)
            }
            SkipReason::Gate(rejection) => write!(f, "{}", rejection),
            SkipReason::Risk(rejection) => write!(f, "{}", rejection),
            SkipReason::WindowClosed => f.write_str("WINDOW_CLOSED"),
            SkipReason::NotFilled { reason } => write!(f, "NOT_FILLED ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DecisionEvent {
    /// A risk-approved intent was handed to the executor
    IntentSubmitted {
        intent: TradeIntent,
        trend: TrendDecision,
        fusion: FusionResult,
        signals: Vec<SignalSnapshot>,
    },
    Filled {
        trade_id: Uuid,
        interval_start: DateTime<Utc>,
        price: f64,
    },
    /// Executor did not fill; retried on the next in-window tick
    ExecutionFailed {
        trade_id: Uuid,
        interval_start: DateTime<Utc>,
        attempt: u32,
        reason: String,
    },
    Skipped {
        interval_start: DateTime<Utc>,
        instrument: String,
        reason: SkipReason,
    },
    Settled { outcome: TradeOutcome },
}

/// Broadcast fan-out of decision events. Publishing never blocks and
/// succeeds with no subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DecisionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: DecisionEvent) {
        if self.sender.send(event).is_err() {
            trace!("No decision event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DecisionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Decimal;

    #[test]
    fn test_skip_reason_codes() {
        assert_eq!(SkipReason::Gate(GateRejection::NoTrend).code(), "NO_TREND");
        let risk = SkipReason::Risk(RiskRejection::DailyLossLimit {
            size: Decimal::ONE,
            remaining: Decimal::ZERO,
        });
        assert_eq!(risk.code(), "DAILY_LOSS_LIMIT");
        assert!(risk.to_string().starts_with("DAILY_LOSS_LIMIT"));
    }

    #[test]
    fn test_skip_serialization() {
        let event = DecisionEvent::Skipped {
            interval_start: Utc::now(),
            instrument: "btc-updown-15m-0".to_string(),
            reason: SkipReason::WindowClosed,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "skipped");
        assert_eq!(json["reason"]["kind"], "WINDOW_CLOSED");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(DecisionEvent::Skipped {
            interval_start: Utc::now(),
            instrument: "m".to_string(),
            reason: SkipReason::WindowClosed,
        });

        let mut receiver = bus.subscribe();
        bus.publish(DecisionEvent::Skipped {
            interval_start: Utc::now(),
            instrument: "m".to_string(),
            reason: SkipReason::WindowClosed,
        });
        assert!(matches!(receiver.recv().await.unwrap(), DecisionEvent::Skipped { .. }));
    }
}
