// Agreement Gate
// The trend asks for a trade; fusion may only veto it.

use crate::fusion::FusionResult;
use crate::trend::{TrendDecision, TrendDirection};
use common::{SignalDirection, TradeDirection};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateRejection {
    /// Price is between the trend thresholds
    NoTrend,
    /// Fusion direction (after the minimum-score rule) differs from the trend
    Disagreement {
        trend: TrendDirection,
        fusion: SignalDirection,
        score: f64,
    },
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRejection::NoTrend => f.write_str("NO_TREND"),
            GateRejection::Disagreement { trend, fusion, score } => write!(
                f,
                "DISAGREEMENT (trend {}, fusion {:?} at {:.1})",
                trend, fusion, score
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateOutcome {
    Proceed(TradeDirection),
    Skip(GateRejection),
}

#[derive(Debug, Clone, Copy)]
pub struct AgreementGate {
    require_agreement: bool,
    min_score: f64,
}

impl AgreementGate {
    pub fn new(require_agreement: bool, min_score: f64) -> Self {
        Self {
            require_agreement,
            min_score,
        }
    }

    /// Fusion direction as seen by the gate: scores below the minimum count
    /// as neutral.
    pub fn effective_direction(&self, fusion: &FusionResult) -> SignalDirection {
        if fusion.score < self.min_score {
            SignalDirection::Neutral
        } else {
            fusion.direction
        }
    }

    pub fn gate(&self, trend: &TrendDecision, fusion: &FusionResult) -> GateOutcome {
        let Some(direction) = trend.direction.trade_direction() else {
            return GateOutcome::Skip(GateRejection::NoTrend);
        };
        if !self.require_agreement {
            return GateOutcome::Proceed(direction);
        }

        let fused = self.effective_direction(fusion);
        if fused == direction.as_signal_direction() {
            GateOutcome::Proceed(direction)
        } else {
            debug!(
                trend = %trend.direction,
                fusion = ?fusion.direction,
                score = fusion.score,
                min_score = self.min_score,
                "Fusion does not agree with trend"
            );
            GateOutcome::Skip(GateRejection::Disagreement {
                trend: trend.direction,
                fusion: fused,
                score: fusion.score,
            })
        }
    }
}
