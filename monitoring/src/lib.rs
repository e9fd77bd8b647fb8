//! Monitoring & Learning (Layer 5)
//!
//! Outcome attribution, per-processor performance and the learning engine
//! that feeds adjusted weights back into signal fusion.

pub mod attribution;
pub mod learning;
pub mod performance;
pub mod store;

pub use attribution::{attribute, summarize, CreditSummary, ProcessorCredit};
pub use learning::{LearningEngine, LearningInsights, WeightAdjustment};
pub use performance::{
    EquityPoint, PerformanceTracker, ProcessorPerformance, ProcessorRanking, TradeSummary,
};
pub use store::{InMemoryStore, JsonFileStore, LearningState, LearningStateStore};
