// Execution Collaborators
// The orchestrator hands a trade intent to an executor and records whatever
// comes back, including non-fills.

use anyhow::Result;
use async_trait::async_trait;
use common::{ExecutionReport, TradeIntent};
use std::sync::Mutex;
use tracing::info;

/// Trait for order execution backends
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submit the intent. An `Err` is treated like a non-fill.
    async fn execute(&self, intent: &TradeIntent) -> Result<ExecutionReport>;
}

/// Simulated executor that fills every intent at the observed token price.
#[derive(Debug, Default)]
pub struct PaperExecutor {
    fills: Mutex<Vec<(TradeIntent, f64)>>,
}

impl PaperExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intents filled so far with their fill prices
    pub fn fills(&self) -> Vec<(TradeIntent, f64)> {
        self.fills
            .lock()
            .map(|fills| fills.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionClient for PaperExecutor {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn execute(&self, intent: &TradeIntent) -> Result<ExecutionReport> {
        let price = intent.direction.token_price(intent.reference_price);
        info!(
            trade_id = %intent.trade_id,
            instrument = %intent.instrument,
            direction = %intent.direction,
            size = %intent.size_usd,
            price,
            "Paper fill"
        );
        if let Ok(mut fills) = self.fills.lock() {
            fills.push((intent.clone(), price));
        }
        Ok(ExecutionReport::filled(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{TradeDirection, Uuid};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_fill_uses_token_price() {
        let executor = PaperExecutor::new();
        let intent = TradeIntent {
            trade_id: Uuid::new_v4(),
            instrument: "btc-updown-15m-0".to_string(),
            interval_start: Utc::now(),
            direction: TradeDirection::BuyNo,
            size_usd: dec!(1.00),
            reference_price: 0.35,
            created_at: Utc::now(),
        };

        let report = executor.execute(&intent).await.unwrap();
        assert!(report.filled);
        assert!((report.fill_price.unwrap() - 0.65).abs() < 1e-12);
        assert_eq!(executor.fills().len(), 1);
    }
}
