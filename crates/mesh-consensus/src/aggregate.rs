//! Aggregation policies turning a complete response set into one result.

use serde_json::Value;

use mesh_protocol::{CONSENSUS_HEADER_MARKER, DEFAULT_CONSENSUS_HEADER, EMPTY_CONSENSUS_BODY};

use crate::ConsensusState;

/// Computes the final result of a task from its recorded responses.
///
/// Implementations must be deterministic in the response set: peers that
/// only ever see the final aggregate rely on every node producing the same
/// string regardless of arrival order.
pub trait Aggregator: Send + Sync {
    fn aggregate(&self, state: &ConsensusState) -> String;
}

impl<F> Aggregator for F
where
    F: Fn(&ConsensusState) -> String + Send + Sync,
{
    fn aggregate(&self, state: &ConsensusState) -> String {
        self(state)
    }
}

/// Default policy: a header line followed by one `agent: response` line per
/// agent, agents sorted lexicographically.
///
/// The header is `context.title`, else the task description, else a generic
/// label.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranscriptAggregator;

impl Aggregator for TranscriptAggregator {
    fn aggregate(&self, state: &ConsensusState) -> String {
        let header = state
            .context
            .get("title")
            .and_then(Value::as_str)
            .filter(|title| !title.is_empty())
            .or_else(|| Some(state.task.as_str()).filter(|task| !task.is_empty()))
            .unwrap_or(DEFAULT_CONSENSUS_HEADER);

        let mut agents: Vec<&String> = state.responses.keys().collect();
        agents.sort();

        let body = if agents.is_empty() {
            EMPTY_CONSENSUS_BODY.to_string()
        } else {
            agents
                .into_iter()
                .map(|agent| format!("{agent}: {}", state.responses[agent]))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!("{CONSENSUS_HEADER_MARKER} {header}\n{body}")
    }
}
