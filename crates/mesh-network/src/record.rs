use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mesh_protocol::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Consensus,
}

/// Audit trail of a distributed task as seen by this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub owner: Option<String>,
    pub task: String,
    pub context: Payload,
    pub created_at: DateTime<Utc>,
    pub responses: BTreeMap<String, String>,
    pub result: Option<String>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

impl TaskRecord {
    pub fn new(task_id: &str, owner: Option<&str>, task: &str, context: &Payload) -> Self {
        Self {
            task_id: task_id.to_string(),
            owner: owner.filter(|o| !o.is_empty()).map(str::to_string),
            task: task.to_string(),
            context: context.clone(),
            created_at: Utc::now(),
            responses: BTreeMap::new(),
            result: None,
            finalized_at: None,
            status: TaskStatus::Pending,
        }
    }

    /// Fill in missing owner/task and merge context; never overwrites.
    pub fn merge(&mut self, owner: Option<&str>, task: &str, context: &Payload) {
        if self.owner.is_none() {
            if let Some(owner) = owner.filter(|o| !o.is_empty()) {
                self.owner = Some(owner.to_string());
            }
        }
        if self.task.is_empty() && !task.is_empty() {
            self.task = task.to_string();
        }
        for (key, value) in context {
            self.context.insert(key.clone(), value.clone());
        }
    }

    pub fn mark_consensus(&mut self, result: Option<&str>, finalized_at: Option<DateTime<Utc>>) {
        self.status = TaskStatus::Consensus;
        self.result = result.map(str::to_string);
        self.finalized_at = finalized_at.or_else(|| Some(Utc::now()));
    }
}
