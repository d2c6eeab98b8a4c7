//! Agent pool and pending-task scheduler.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::snapshot::{
    AgentSnapshot, OrchestratorMetrics, OrchestratorSnapshot, PendingTaskSnapshot,
};
use crate::{
    seconds_between, AgentState, AgentUpdate, AssignedTask, Metadata, PendingQueue, QueuedTask,
};

/// Number of completion latencies kept for `avg_task_latency`.
pub const LATENCY_WINDOW: usize = 200;

#[derive(Debug, Default)]
struct SchedulerState {
    agents: HashMap<String, AgentState>,
    pending: PendingQueue,
    next_seq: u64,
    tasks_distributed_total: u64,
    tasks_completed_total: u64,
    tasks_failed_total: u64,
    latencies: VecDeque<f64>,
}

impl SchedulerState {
    fn upsert_agent(&mut self, agent_id: &str) -> &mut AgentState {
        self.agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentState::new(agent_id, 1, 0))
    }

    /// Best agent with free capacity: least utilised, then highest priority,
    /// then lowest id.
    fn best_available_agent(&self) -> Option<String> {
        self.agents
            .values()
            .filter(|agent| agent.has_capacity())
            .min_by(|a, b| {
                a.utilisation()
                    .total_cmp(&b.utilisation())
                    .then_with(|| b.priority.cmp(&a.priority))
                    .then_with(|| a.agent_id.cmp(&b.agent_id))
            })
            .map(|agent| agent.agent_id.clone())
    }

    /// Hand pending tasks to agents until either runs out.
    ///
    /// Returns the assignment made for `watched` during this sweep, if any.
    fn assign_pending(&mut self, watched: Option<&str>) -> Option<AssignedTask> {
        let mut watched_assignment = None;

        while !self.pending.is_empty() {
            let Some(agent_id) = self.best_available_agent() else {
                break;
            };
            let Some(agent) = self.agents.get_mut(&agent_id) else {
                break;
            };
            let Some(task) = self.pending.pop() else {
                break;
            };

            let now = Utc::now();
            let assigned = AssignedTask::from_queued(task, &agent_id, now);
            tracing::debug!(
                task_id = %assigned.task_id,
                agent_id = %agent_id,
                priority = assigned.priority,
                "Task assigned"
            );
            if watched == Some(assigned.task_id.as_str()) {
                watched_assignment = Some(assigned.clone());
            }
            agent.assigned.insert(assigned.task_id.clone(), assigned);
            agent.last_heartbeat = now;
            self.tasks_distributed_total += 1;
        }

        watched_assignment
    }

    fn record_latency(&mut self, seconds: f64) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(seconds);
    }

    fn avg_task_latency(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        self.latencies.iter().sum::<f64>() / self.latencies.len() as f64
    }
}

/// Priority scheduler over a pool of capacity-bounded agents.
///
/// Every mutating call runs an assignment sweep before returning, so pending
/// work is placed as soon as capacity exists. Assignments are never moved
/// between agents; they leave an agent only on completion or unregistration.
#[derive(Debug, Default)]
pub struct TaskOrchestrator {
    state: Mutex<SchedulerState>,
}

impl TaskOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent, or reset an existing one's parameters and reactivate it.
    pub async fn register_agent(&self, agent_id: &str, capacity: u32, priority: i64) -> AgentState {
        let mut state = self.state.lock().await;
        let agent = state.upsert_agent(agent_id);
        agent.capacity = capacity;
        agent.priority = priority;
        agent.active = true;
        agent.last_heartbeat = Utc::now();

        tracing::info!(agent_id, capacity, priority, "Agent registered");
        state.assign_pending(None);
        snapshot_agent(&state, agent_id)
    }

    /// Liveness signal with optional parameter changes. Unknown agents are
    /// created with capacity 1 and priority 0 before the update applies.
    pub async fn heartbeat(&self, agent_id: &str, update: AgentUpdate) -> AgentState {
        let mut state = self.state.lock().await;
        let agent = state.upsert_agent(agent_id);
        if let Some(capacity) = update.capacity {
            agent.capacity = capacity;
        }
        if let Some(priority) = update.priority {
            agent.priority = priority;
        }
        if let Some(active) = update.active {
            agent.active = active;
        }
        agent.last_heartbeat = Utc::now();

        tracing::trace!(agent_id, "Agent heartbeat");
        state.assign_pending(None);
        snapshot_agent(&state, agent_id)
    }

    /// Remove an agent and requeue everything it held with the original
    /// priority and submission order. Returns the removed agent as it was.
    pub async fn unregister_agent(&self, agent_id: &str) -> Option<AgentState> {
        let mut state = self.state.lock().await;
        let removed = state.agents.remove(agent_id)?;

        let requeued = removed.assigned.len();
        for task in removed.assigned.values() {
            state.pending.push(task.clone().into_queued());
        }
        tracing::info!(agent_id, requeued, "Agent unregistered");

        state.assign_pending(None);
        Some(removed)
    }

    /// Queue a task and sweep. Returns the assignment when this task was
    /// placed immediately, `None` when it stays queued.
    pub async fn submit_task(
        &self,
        task_id: &str,
        payload: Metadata,
        priority: i64,
        meta: Metadata,
    ) -> Option<AssignedTask> {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(QueuedTask {
            priority,
            created_at: Utc::now(),
            seq,
            task_id: task_id.to_string(),
            payload,
            meta,
        });

        let assigned = state.assign_pending(Some(task_id));
        if assigned.is_none() {
            tracing::debug!(task_id, priority, pending = state.pending.len(), "Task queued");
        }
        assigned
    }

    /// Release a task from its agent. Unknown agent or task is a no-op.
    pub async fn complete_task(
        &self,
        agent_id: &str,
        task_id: &str,
        success: bool,
    ) -> Option<AssignedTask> {
        let mut state = self.state.lock().await;
        let completed = state
            .agents
            .get_mut(agent_id)
            .and_then(|agent| agent.assigned.remove(task_id));

        if let Some(task) = &completed {
            if success {
                let latency = seconds_between(task.created_at, Utc::now());
                state.record_latency(latency);
                state.tasks_completed_total += 1;
                tracing::debug!(agent_id, task_id, latency, "Task completed");
            } else {
                state.tasks_failed_total += 1;
                tracing::warn!(agent_id, task_id, "Task failed");
            }
        }

        state.assign_pending(None);
        completed
    }

    pub async fn get_status_snapshot(&self) -> OrchestratorSnapshot {
        let state = self.state.lock().await;
        let now = Utc::now();

        let mut agents: Vec<&AgentState> = state.agents.values().collect();
        agents.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.utilisation().total_cmp(&b.utilisation()))
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });

        OrchestratorSnapshot {
            agents: agents
                .into_iter()
                .map(|agent| AgentSnapshot::capture(agent, now))
                .collect(),
            pending_tasks: state
                .pending
                .sorted()
                .into_iter()
                .map(PendingTaskSnapshot::from)
                .collect(),
            metrics: OrchestratorMetrics {
                tasks_distributed_total: state.tasks_distributed_total,
                tasks_completed_total: state.tasks_completed_total,
                tasks_failed_total: state.tasks_failed_total,
                avg_task_latency: state.avg_task_latency(),
            },
        }
    }

    pub async fn tasks_distributed_total(&self) -> u64 {
        self.state.lock().await.tasks_distributed_total
    }

    /// Mean latency in seconds of the most recent successful completions.
    pub async fn avg_task_latency(&self) -> f64 {
        self.state.lock().await.avg_task_latency()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}

fn snapshot_agent(state: &SchedulerState, agent_id: &str) -> AgentState {
    state
        .agents
        .get(agent_id)
        .cloned()
        .unwrap_or_else(|| AgentState::new(agent_id, 1, 0))
}
