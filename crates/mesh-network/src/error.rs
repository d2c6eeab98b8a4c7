use std::time::Duration;

use thiserror::Error;

/// Failure delivering an envelope to a single peer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("peer unreachable: {0}")]
    Unreachable(String),
}

/// Failure reported by a task executor.
///
/// Displays as the bare message so it can be embedded in a degraded vote.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ExecutorError(pub String);

impl ExecutorError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("consensus for task {task_id} not reached within {timeout:?}")]
    ConsensusTimeout { task_id: String, timeout: Duration },

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}
