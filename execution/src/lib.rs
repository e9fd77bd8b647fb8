//! Execution (Layer 4)
//!
//! The decision orchestrator that turns ticks into at most one trade per
//! market interval, the execution collaborator seam, and the decision events
//! it publishes.

pub mod clock;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod window;

pub use clock::{Clock, SystemClock};
pub use events::{DecisionEvent, EventBus, SkipReason};
pub use executor::{ExecutionClient, PaperExecutor};
pub use orchestrator::{Decision, DecisionOrchestrator, OrchestratorState};
pub use window::{MarketInterval, TradeWindow};
