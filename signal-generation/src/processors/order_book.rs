// Order Book Imbalance
// USD depth skew between bids and asks of the YES token.

use super::{tiered_strength, ProcessorInput, SignalProcessor};
use common::{OrderBookParams, ProcessorId, Signal, SignalDirection};
use data_ingestion::BookLevel;
use serde_json::json;
use tracing::debug;

pub struct OrderBookImbalanceProcessor {
    params: OrderBookParams,
}

impl OrderBookImbalanceProcessor {
    pub fn new(params: OrderBookParams) -> Self {
        Self { params }
    }

    fn depth(&self, levels: &[BookLevel]) -> f64 {
        levels
            .iter()
            .take(self.params.top_levels)
            .map(BookLevel::notional)
            .sum()
    }

    /// Largest single level if it holds at least the wall share of total depth.
    fn wall(&self, levels: &[BookLevel], total: f64) -> Option<f64> {
        if total <= 0.0 {
            return None;
        }
        levels
            .iter()
            .take(self.params.top_levels)
            .map(BookLevel::notional)
            .find(|notional| notional / total >= self.params.wall_threshold)
    }
}

impl SignalProcessor for OrderBookImbalanceProcessor {
    fn id(&self) -> ProcessorId {
        ProcessorId::OrderBookImbalance
    }

    fn process(&self, input: &ProcessorInput<'_>) -> Option<Signal> {
        let book = input.context.order_book.as_ref()?;

        let bid_depth = self.depth(&book.bids);
        let ask_depth = self.depth(&book.asks);
        let total = bid_depth + ask_depth;
        if total < self.params.min_book_volume {
            debug!(total, "OrderBook too thin");
            return None;
        }

        let imbalance = (bid_depth - ask_depth) / total;
        if imbalance.abs() < self.params.imbalance_threshold {
            return None;
        }

        let direction = if imbalance > 0.0 {
            SignalDirection::Bullish
        } else {
            SignalDirection::Bearish
        };
        let strength = tiered_strength(imbalance.abs(), [0.35, 0.50, 0.70]);

        let mut confidence = (0.55 + imbalance.abs() * 0.40).min(0.85);
        let wall = match direction {
            SignalDirection::Bullish => self.wall(&book.bids, total),
            _ => self.wall(&book.asks, total),
        };
        if wall.is_some() {
            confidence = (confidence + 0.05).min(0.90);
        }
        if confidence < self.params.min_confidence {
            return None;
        }

        Some(
            Signal::new(self.id(), direction, strength, confidence, input.now).with_metadata(json!({
                "bid_depth_usd": bid_depth,
                "ask_depth_usd": ask_depth,
                "imbalance": imbalance,
                "wall_usd": wall,
            })),
        )
    }
}
