// Signal Processors
// Each processor turns price history and one pre-fetched context feed into
// at most one directional opinion per decision cycle.

use chrono::{DateTime, Utc};
use common::{PriceSample, ProcessorId, ProcessorParams, Signal, SignalStrength};
use data_ingestion::MarketContext;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

pub mod deribit_pcr;
pub mod divergence;
pub mod order_book;
pub mod sentiment;
pub mod spike;
pub mod tick_velocity;

pub use deribit_pcr::DeribitPcrProcessor;
pub use divergence::PriceDivergenceProcessor;
pub use order_book::OrderBookImbalanceProcessor;
pub use sentiment::SentimentProcessor;
pub use spike::SpikeDetectionProcessor;
pub use tick_velocity::TickVelocityProcessor;

/// Everything a processor may read during one cycle. Borrowed from the
/// cycle's snapshot; processors never see live state.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorInput<'a> {
    pub current_price: f64,
    /// Oldest first
    pub history: &'a [PriceSample],
    pub context: &'a MarketContext,
    /// Decision time; used for lookbacks and as the signal timestamp
    pub now: DateTime<Utc>,
}

/// Processor trait
///
/// Implementations are stateless between calls and must not perform I/O.
pub trait SignalProcessor: Send + Sync {
    fn id(&self) -> ProcessorId;

    fn process(&self, input: &ProcessorInput<'_>) -> Option<Signal>;
}

/// The closed set of processors run on every decision cycle.
pub struct ProcessorSet {
    processors: Vec<Box<dyn SignalProcessor>>,
}

impl ProcessorSet {
    pub fn new(processors: Vec<Box<dyn SignalProcessor>>) -> Self {
        Self { processors }
    }

    /// All six processors with the given parameters.
    pub fn from_params(params: &ProcessorParams) -> Self {
        Self::new(vec![
            Box::new(OrderBookImbalanceProcessor::new(params.order_book.clone())),
            Box::new(TickVelocityProcessor::new(params.tick_velocity.clone())),
            Box::new(PriceDivergenceProcessor::new(params.divergence.clone())),
            Box::new(SpikeDetectionProcessor::new(params.spike.clone())),
            Box::new(DeribitPcrProcessor::new(params.deribit_pcr.clone())),
            Box::new(SentimentProcessor::new(params.sentiment.clone())),
        ])
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn ids(&self) -> Vec<ProcessorId> {
        self.processors.iter().map(|p| p.id()).collect()
    }

    /// Run every processor. A processor that panics is treated as silent for
    /// this cycle and does not affect the others.
    pub fn run(&self, input: &ProcessorInput<'_>) -> Vec<Signal> {
        let mut signals = Vec::new();
        for processor in &self.processors {
            let id = processor.id();
            match catch_unwind(AssertUnwindSafe(|| processor.process(input))) {
                Ok(Some(signal)) => {
                    debug!(
                        processor = %id,
                        direction = ?signal.direction,
                        strength = signal.strength.value(),
                        confidence = signal.confidence,
                        "Processor emitted signal"
                    );
                    signals.push(signal);
                }
                Ok(None) => debug!(processor = %id, "Processor silent"),
                Err(_) => warn!(processor = %id, "Processor faulted; treating as absent"),
            }
        }
        signals
    }
}

/// Map a magnitude onto strength tiers given ascending `[moderate, strong, very_strong]` cut-offs.
pub(crate) fn tiered_strength(magnitude: f64, tiers: [f64; 3]) -> SignalStrength {
    if magnitude >= tiers[2] {
        SignalStrength::VeryStrong
    } else if magnitude >= tiers[1] {
        SignalStrength::Strong
    } else if magnitude >= tiers[0] {
        SignalStrength::Moderate
    } else {
        SignalStrength::Weak
    }
}
