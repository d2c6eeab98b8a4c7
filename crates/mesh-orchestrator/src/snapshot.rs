//! Read-only views of orchestrator state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{AgentState, AssignedTask, Metadata, QueuedTask};

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignedTaskSnapshot {
    pub task_id: String,
    pub priority: i64,
    pub payload: Metadata,
    pub assigned_at: DateTime<Utc>,
    pub in_progress_for: f64,
    pub total_latency: f64,
    pub meta: Metadata,
}

impl AssignedTaskSnapshot {
    pub(crate) fn capture(task: &AssignedTask, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.task_id.clone(),
            priority: task.priority,
            payload: task.payload.clone(),
            assigned_at: task.assigned_at,
            in_progress_for: round3(task.in_progress_for(now)),
            total_latency: round3(task.total_latency(now)),
            meta: task.meta.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub active: bool,
    pub capacity: u32,
    pub priority: i64,
    pub utilisation: f64,
    pub assigned_tasks: Vec<AssignedTaskSnapshot>,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentSnapshot {
    pub(crate) fn capture(agent: &AgentState, now: DateTime<Utc>) -> Self {
        let mut tasks: Vec<&AssignedTask> = agent.assigned.values().collect();
        tasks.sort_by(|a, b| {
            a.assigned_at
                .cmp(&b.assigned_at)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        Self {
            agent_id: agent.agent_id.clone(),
            active: agent.active,
            capacity: agent.capacity,
            priority: agent.priority,
            utilisation: round3(agent.utilisation()),
            assigned_tasks: tasks
                .into_iter()
                .map(|task| AssignedTaskSnapshot::capture(task, now))
                .collect(),
            last_heartbeat: agent.last_heartbeat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingTaskSnapshot {
    pub task_id: String,
    pub priority: i64,
    pub payload: Metadata,
    pub created_at: DateTime<Utc>,
    pub meta: Metadata,
}

impl From<&QueuedTask> for PendingTaskSnapshot {
    fn from(task: &QueuedTask) -> Self {
        Self {
            task_id: task.task_id.clone(),
            priority: task.priority,
            payload: task.payload.clone(),
            created_at: task.created_at,
            meta: task.meta.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorMetrics {
    pub tasks_distributed_total: u64,
    pub tasks_completed_total: u64,
    pub tasks_failed_total: u64,
    /// Mean submission-to-completion time in seconds over the rolling window.
    pub avg_task_latency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorSnapshot {
    /// Highest priority first, then least utilised, then by id.
    pub agents: Vec<AgentSnapshot>,
    /// In dequeue order.
    pub pending_tasks: Vec<PendingTaskSnapshot>,
    pub metrics: OrchestratorMetrics,
}
