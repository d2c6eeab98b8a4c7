use std::time::Duration;

use mesh_consensus::RetentionPolicy;

/// Settings needed to build an `AgentNetwork` from configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// This agent's identifier, used as `sender` on every envelope.
    pub agent_id: String,
    /// Comma-separated `name=url` neighbour list.
    pub neighbors: String,
    /// Expected responders per task; defaults to every neighbour plus self.
    pub participants: Option<usize>,
    pub request_timeout: Duration,
    /// Upper bound on concurrently running background executions.
    pub max_concurrent_executions: usize,
    pub retention: RetentionPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            agent_id: "agent".to_string(),
            neighbors: String::new(),
            participants: None,
            request_timeout: Duration::from_secs(10),
            max_concurrent_executions: 16,
            retention: RetentionPolicy::default(),
        }
    }
}
