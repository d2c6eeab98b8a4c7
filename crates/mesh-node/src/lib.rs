//! Mesh Node - host process for one agent
//!
//! Wires an `AgentNetwork` and a `TaskOrchestrator` into an explicitly
//! passed `AppContext`, and exposes them over HTTP: the peer exchange
//! endpoint other agents call, plus admin APIs for operators.

pub mod config;
pub mod context;
pub mod error;
pub mod server;

pub use config::{Cli, NodeConfig};
pub use context::AppContext;
pub use error::ConfigError;
pub use server::{router, NodeServer};
