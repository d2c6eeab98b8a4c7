//! Mesh Consensus - per-task response tracking and aggregation
//!
//! Decides, for each task id, when enough peer responses have arrived and
//! what the agreed result is. The engine is plain state: callers feed it
//! expectations and responses and read back outcomes. Every operation is
//! idempotent so that out-of-order and repeated deliveries are harmless.

pub mod aggregate;
pub mod engine;
pub mod retention;
pub mod state;

pub use aggregate::{Aggregator, TranscriptAggregator};
pub use engine::ConsensusEngine;
pub use retention::RetentionPolicy;
pub use state::{ConsensusOutcome, ConsensusState, FinalityWatch};
