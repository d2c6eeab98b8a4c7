//! Mesh Orchestrator - capacity-aware task scheduling
//!
//! Keeps a pool of capacity-bounded agents and a priority queue of pending
//! tasks, and greedily hands each pending task to the least-utilised agent
//! that still has room.
//!
//! Two priority conventions coexist on purpose:
//! - task priority: lower value is dequeued first;
//! - agent priority: higher value is preferred among equally utilised agents.

pub mod agent;
pub mod orchestrator;
pub mod queue;
pub mod snapshot;

pub use agent::{AgentState, AgentUpdate, AssignedTask};
pub use orchestrator::{TaskOrchestrator, LATENCY_WINDOW};
pub use queue::{PendingQueue, QueuedTask};
pub use snapshot::{
    AgentSnapshot, AssignedTaskSnapshot, OrchestratorMetrics, OrchestratorSnapshot,
    PendingTaskSnapshot,
};

/// Free-form JSON object attached to tasks (payload and metadata).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Seconds elapsed from `since` to `now`, never negative.
pub(crate) fn seconds_between(
    since: chrono::DateTime<chrono::Utc>,
    now: chrono::DateTime<chrono::Utc>,
) -> f64 {
    (now - since)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
