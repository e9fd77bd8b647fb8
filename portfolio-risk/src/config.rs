//! Risk limit configuration

use common::{Decimal, RiskSettings};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Limits enforced on every trade intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum number of open positions
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,

    /// Maximum realized loss per day (USD)
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: Decimal,

    /// Maximum fractional drawdown from the high-water mark
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_positions: default_max_positions(),
            daily_loss_limit: default_daily_loss_limit(),
            max_drawdown_pct: default_max_drawdown_pct(),
        }
    }
}

impl From<&RiskSettings> for RiskLimits {
    fn from(settings: &RiskSettings) -> Self {
        Self {
            max_positions: settings.max_positions,
            daily_loss_limit: settings.daily_loss_limit,
            max_drawdown_pct: settings.max_drawdown_pct,
        }
    }
}

fn default_max_positions() -> usize {
    5
}

fn default_daily_loss_limit() -> Decimal {
    dec!(5.00)
}

fn default_max_drawdown_pct() -> f64 {
    0.15
}
