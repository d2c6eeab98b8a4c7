use std::sync::Arc;
use std::time::Duration;

use mesh_network::{AgentNetwork, AnalysisExecutor, NetworkError, TaskExecutor};
use mesh_orchestrator::TaskOrchestrator;

use crate::config::NodeConfig;

/// Services owned by one node process and shared with every handler.
#[derive(Clone)]
pub struct AppContext {
    pub network: AgentNetwork,
    pub orchestrator: Arc<TaskOrchestrator>,
    /// Default wait for `POST /api/tasks`.
    pub dispatch_timeout: Duration,
}

impl AppContext {
    pub fn new(
        network: AgentNetwork,
        orchestrator: Arc<TaskOrchestrator>,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            network,
            orchestrator,
            dispatch_timeout,
        }
    }

    /// HTTP-backed network answering with the built-in analysis executor.
    pub fn from_config(config: &NodeConfig) -> Result<Self, NetworkError> {
        let executor: Arc<dyn TaskExecutor> =
            Arc::new(AnalysisExecutor::new(config.agent.id.clone()));
        let network = AgentNetwork::from_config(&config.to_network_config(), Some(executor))?;
        Ok(Self::new(
            network,
            Arc::new(TaskOrchestrator::new()),
            config.dispatch_timeout(),
        ))
    }
}
