// Signal Generation (Layer 2)
// Turns price history and market context into one fused, gated direction

pub mod fusion;
pub mod gate;
pub mod processors;
pub mod trend;
pub mod weights;

pub use fusion::{FusionEngine, FusionResult};
pub use gate::{AgreementGate, GateOutcome, GateRejection};
pub use processors::{ProcessorInput, ProcessorSet, SignalProcessor};
pub use trend::{classify, TrendDecision, TrendDirection, TrendFilter};
pub use weights::{project_weights, WeightHandle, WeightTable};
