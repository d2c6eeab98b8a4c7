use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use mesh_protocol::Payload;

/// Receiver side of a state's one-shot finality signal.
///
/// Resolves once the state is finalised; subscribing after that point
/// observes the final result immediately.
pub type FinalityWatch = watch::Receiver<Option<String>>;

/// Tracks one distributed task until consensus is reached.
#[derive(Debug)]
pub struct ConsensusState {
    pub task_id: String,
    /// Originating agent, unknown until a TASK or RESULT names it.
    pub owner: Option<String>,
    pub expected_participants: usize,
    pub task: String,
    pub context: Payload,
    pub created_at: DateTime<Utc>,
    /// Latest response per agent.
    pub responses: BTreeMap<String, String>,
    final_result: Option<String>,
    finalized_at: Option<DateTime<Utc>>,
    finality: watch::Sender<Option<String>>,
}

impl ConsensusState {
    pub fn new(
        task_id: impl Into<String>,
        owner: Option<String>,
        expected_participants: usize,
        task: impl Into<String>,
        context: Payload,
    ) -> Self {
        let (finality, _) = watch::channel(None);
        Self {
            task_id: task_id.into(),
            owner,
            expected_participants: expected_participants.max(1),
            task: task.into(),
            context,
            created_at: Utc::now(),
            responses: BTreeMap::new(),
            final_result: None,
            finalized_at: None,
            finality,
        }
    }

    pub fn missing_participants(&self) -> usize {
        self.expected_participants
            .saturating_sub(self.responses.len())
    }

    /// Record (or overwrite) the response of one agent.
    pub fn record_response(&mut self, agent_id: impl Into<String>, response: impl Into<String>) {
        self.responses.insert(agent_id.into(), response.into());
    }

    /// Set the final result and wake all waiters.
    ///
    /// Only the first call has any effect; returns whether it did.
    pub fn finalize(&mut self, result: impl Into<String>) -> bool {
        if self.final_result.is_some() {
            return false;
        }
        let result = result.into();
        self.final_result = Some(result.clone());
        self.finalized_at = Some(Utc::now());
        self.finality.send_replace(Some(result));
        true
    }

    pub fn final_result(&self) -> Option<&str> {
        self.final_result.as_deref()
    }

    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    pub fn is_final(&self) -> bool {
        self.final_result.is_some()
    }

    pub fn subscribe(&self) -> FinalityWatch {
        self.finality.subscribe()
    }
}

/// Result of registering one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsensusOutcome {
    pub ready: bool,
    pub result: Option<String>,
    pub responses: BTreeMap<String, String>,
    pub missing: usize,
    /// True when the task had been finalised before this call.
    pub already_final: bool,
}

impl ConsensusOutcome {
    /// Whether this specific call is the one that reached consensus.
    pub fn newly_final(&self) -> bool {
        self.ready && !self.already_final
    }
}
