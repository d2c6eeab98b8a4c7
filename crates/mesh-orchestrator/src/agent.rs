use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{seconds_between, Metadata, QueuedTask};

/// A task currently held by an agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignedTask {
    pub task_id: String,
    pub agent_id: String,
    pub payload: Metadata,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub assigned_at: DateTime<Utc>,
    pub meta: Metadata,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl AssignedTask {
    pub(crate) fn from_queued(
        task: QueuedTask,
        agent_id: &str,
        assigned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task.task_id,
            agent_id: agent_id.to_string(),
            payload: task.payload,
            priority: task.priority,
            created_at: task.created_at,
            assigned_at,
            meta: task.meta,
            seq: task.seq,
        }
    }

    /// Back to the queue with the original priority, age and position.
    pub(crate) fn into_queued(self) -> QueuedTask {
        QueuedTask {
            priority: self.priority,
            created_at: self.created_at,
            seq: self.seq,
            task_id: self.task_id,
            payload: self.payload,
            meta: self.meta,
        }
    }

    /// Seconds since the task was handed to its agent.
    pub fn in_progress_for(&self, now: DateTime<Utc>) -> f64 {
        seconds_between(self.assigned_at, now)
    }

    /// Seconds since the task was first submitted.
    pub fn total_latency(&self, now: DateTime<Utc>) -> f64 {
        seconds_between(self.created_at, now)
    }
}

/// Optional parameter changes carried by a heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentUpdate {
    pub capacity: Option<u32>,
    pub priority: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentState {
    pub agent_id: String,
    /// Maximum concurrent tasks; zero behaves as one.
    pub capacity: u32,
    /// Higher values are preferred when utilisation ties.
    pub priority: i64,
    pub active: bool,
    pub assigned: BTreeMap<String, AssignedTask>,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>, capacity: u32, priority: i64) -> Self {
        Self {
            agent_id: agent_id.into(),
            capacity,
            priority,
            active: true,
            assigned: BTreeMap::new(),
            last_heartbeat: Utc::now(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.active && self.assigned.len() < self.capacity.max(1) as usize
    }

    /// Ratio of held tasks to capacity; 1.0 when capacity is zero.
    pub fn utilisation(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.assigned.len() as f64 / self.capacity as f64
    }
}
