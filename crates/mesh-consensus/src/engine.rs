use std::collections::HashMap;

use chrono::Utc;

use mesh_protocol::Payload;

use crate::{Aggregator, ConsensusOutcome, ConsensusState, RetentionPolicy, TranscriptAggregator};

/// Tracks distributed tasks and computes consensus for them.
pub struct ConsensusEngine {
    aggregator: Box<dyn Aggregator>,
    retention: RetentionPolicy,
    tasks: HashMap<String, ConsensusState>,
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self::new(TranscriptAggregator)
    }
}

impl ConsensusEngine {
    pub fn new(aggregator: impl Aggregator + 'static) -> Self {
        Self {
            aggregator: Box::new(aggregator),
            retention: RetentionPolicy::default(),
            tasks: HashMap::new(),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Register (or widen) the expectation for a task.
    ///
    /// The participant count only ever grows; `owner` and `task` are filled in
    /// only when still empty; `context` is merged key by key.
    pub fn expect(
        &mut self,
        task_id: &str,
        owner: Option<&str>,
        participants: usize,
        task: &str,
        context: &Payload,
    ) -> &mut ConsensusState {
        upsert(&mut self.tasks, task_id, owner, participants, task, context)
    }

    /// Record one agent's response and finalise once every expected
    /// participant has answered.
    ///
    /// Unknown tasks are created on the fly with a single expected
    /// participant. Calls after finalisation return the stored result with
    /// `already_final` set and change nothing.
    pub fn register_response(
        &mut self,
        task_id: &str,
        agent_id: &str,
        response: &str,
    ) -> ConsensusOutcome {
        let state = upsert(&mut self.tasks, task_id, None, 1, "", &Payload::new());

        if let Some(result) = state.final_result() {
            return ConsensusOutcome {
                ready: true,
                result: Some(result.to_string()),
                responses: state.responses.clone(),
                missing: 0,
                already_final: true,
            };
        }

        state.record_response(agent_id, response);
        let missing = state.missing_participants();

        if missing == 0 && !state.responses.is_empty() {
            let result = self.aggregator.aggregate(state);
            state.finalize(result.clone());
            tracing::info!(
                task_id = %task_id,
                responses = state.responses.len(),
                "Consensus reached"
            );
            return ConsensusOutcome {
                ready: true,
                result: Some(result),
                responses: state.responses.clone(),
                missing: 0,
                already_final: false,
            };
        }

        tracing::debug!(task_id = %task_id, agent = %agent_id, missing, "Response recorded");

        ConsensusOutcome {
            ready: false,
            result: None,
            responses: state.responses.clone(),
            missing,
            already_final: false,
        }
    }

    /// Adopt a result finalised elsewhere, verbatim.
    ///
    /// A no-op if this node already holds a final result for the task.
    pub fn accept_final(&mut self, task_id: &str, result: &str) -> &mut ConsensusState {
        let state = upsert(&mut self.tasks, task_id, None, 1, "", &Payload::new());
        if state.finalize(result) {
            tracing::info!(task_id = %task_id, "Adopted consensus from peer");
        }
        state
    }

    pub fn get(&self, task_id: &str) -> Option<&ConsensusState> {
        self.tasks.get(task_id)
    }

    pub fn forget(&mut self, task_id: &str) -> Option<ConsensusState> {
        self.tasks.remove(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Evict finalised states according to the retention policy.
    ///
    /// Returns the evicted task ids. `keep` is never evicted.
    pub fn prune(&mut self, keep: Option<&str>) -> Vec<String> {
        if self.retention.is_unbounded() {
            return Vec::new();
        }
        let finalized = self
            .tasks
            .values()
            .filter_map(|s| s.finalized_at().map(|at| (s.task_id.clone(), at)))
            .collect();
        let evicted = self.retention.select_evictions(finalized, Utc::now(), keep);
        for task_id in &evicted {
            self.tasks.remove(task_id);
        }
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "Pruned finalized consensus states");
        }
        evicted
    }
}

fn upsert<'a>(
    tasks: &'a mut HashMap<String, ConsensusState>,
    task_id: &str,
    owner: Option<&str>,
    participants: usize,
    task: &str,
    context: &Payload,
) -> &'a mut ConsensusState {
    let owner = owner.filter(|o| !o.is_empty());
    let state = tasks.entry(task_id.to_string()).or_insert_with(|| {
        ConsensusState::new(
            task_id,
            owner.map(str::to_string),
            participants,
            task,
            context.clone(),
        )
    });

    state.expected_participants = state.expected_participants.max(participants);
    if state.owner.as_deref().map_or(true, str::is_empty) {
        if let Some(owner) = owner {
            state.owner = Some(owner.to_string());
        }
    }
    if state.task.is_empty() && !task.is_empty() {
        state.task = task.to_string();
    }
    for (key, value) in context {
        state.context.insert(key.clone(), value.clone());
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expect_keeps_first_owner_and_task() {
        let mut engine = ConsensusEngine::default();
        engine.expect("t1", None, 1, "", &Payload::new());
        engine.expect("t1", Some("a1"), 1, "sum", &Payload::new());
        let state = engine.expect("t1", Some("a2"), 1, "product", &Payload::new());
        assert_eq!(state.owner.as_deref(), Some("a1"));
        assert_eq!(state.task, "sum");
    }

    #[test]
    fn test_expect_merges_context() {
        let mut engine = ConsensusEngine::default();
        let mut first = Payload::new();
        first.insert("a".into(), json!(1));
        let mut second = Payload::new();
        second.insert("b".into(), json!(2));
        second.insert("a".into(), json!(3));
        engine.expect("t1", None, 1, "", &first);
        let state = engine.expect("t1", None, 1, "", &second);
        assert_eq!(state.context.get("a"), Some(&json!(3)));
        assert_eq!(state.context.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_register_on_unknown_task_creates_single_participant() {
        let mut engine = ConsensusEngine::default();
        let outcome = engine.register_response("late", "a9", "42");
        assert!(outcome.ready);
        assert!(!outcome.already_final);
        assert_eq!(
            outcome.result.as_deref(),
            Some("🤝 Consensus result\na9: 42")
        );
    }

    #[test]
    fn test_accept_final_does_not_override() {
        let mut engine = ConsensusEngine::default();
        engine.expect("t1", None, 1, "sum", &Payload::new());
        engine.register_response("t1", "a1", "5");
        let state = engine.accept_final("t1", "something else");
        assert_eq!(state.final_result(), Some("🤝 sum\na1: 5"));
    }

    #[test]
    fn test_accept_final_adopts_verbatim() {
        let mut engine = ConsensusEngine::default();
        engine.expect("t1", None, 3, "sum", &Payload::new());
        engine.register_response("t1", "a1", "5");
        let state = engine.accept_final("t1", "peer aggregate");
        assert_eq!(state.final_result(), Some("peer aggregate"));

        let outcome = engine.register_response("t1", "a2", "7");
        assert!(outcome.already_final);
        assert_eq!(outcome.result.as_deref(), Some("peer aggregate"));
    }

    #[test]
    fn test_forget_removes_state() {
        let mut engine = ConsensusEngine::default();
        engine.expect("t1", None, 1, "", &Payload::new());
        assert!(engine.forget("t1").is_some());
        assert!(engine.get("t1").is_none());
        assert!(engine.forget("t1").is_none());
    }

    #[test]
    fn test_prune_keeps_pending_states() {
        let mut engine = ConsensusEngine::default().with_retention(RetentionPolicy {
            max_finalized: Some(1),
            finalized_ttl: None,
        });
        engine.expect("pending", None, 2, "", &Payload::new());
        engine.register_response("done", "a1", "x");
        engine.register_response("latest", "a1", "y");
        let evicted = engine.prune(Some("latest"));
        assert_eq!(evicted, vec!["done".to_string()]);
        assert!(engine.get("pending").is_some());
        assert!(engine.get("latest").is_some());
        assert_eq!(engine.len(), 2);
    }
}
