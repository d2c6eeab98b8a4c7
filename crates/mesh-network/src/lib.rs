//! Mesh Network - task exchange between neighbouring agents
//!
//! `AgentNetwork` broadcasts tasks to configured peers, executes tasks
//! locally through an injected `TaskExecutor`, submits its own answer as a
//! consensus vote, and propagates results and final consensus to peers over
//! a pluggable `PeerTransport`.

pub mod config;
pub mod error;
pub mod executor;
pub mod network;
pub mod record;
pub mod transport;

pub use config::NetworkConfig;
pub use error::*;
pub use executor::{AnalysisExecutor, ExecutionOutcome, FnExecutor, TaskExecutor};
pub use network::{AgentNetwork, AgentNetworkBuilder};
pub use record::{TaskRecord, TaskStatus};
pub use transport::{HttpTransport, PeerTransport};
