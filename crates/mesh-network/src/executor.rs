//! Local task execution.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use mesh_protocol::{Payload, EXECUTOR_ERROR_MARKER};

use crate::ExecutorError;

/// Produces this agent's answer to a task.
///
/// Implementations must not block the runtime. An `Err` does not abort the
/// protocol: it is cast as a visibly failed vote.
pub trait TaskExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        task: &'a str,
        context: &'a Payload,
    ) -> Pin<Box<dyn Future<Output = Result<String, ExecutorError>> + Send + 'a>>;
}

/// What a local execution produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed(String),
    Failed(String),
}

impl ExecutionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ExecutionOutcome::Failed(_))
    }

    /// Text submitted to consensus on behalf of this agent.
    pub fn vote(&self) -> String {
        match self {
            ExecutionOutcome::Completed(result) => result.clone(),
            ExecutionOutcome::Failed(error) => format!("{EXECUTOR_ERROR_MARKER} {error}"),
        }
    }
}

impl From<Result<String, ExecutorError>> for ExecutionOutcome {
    fn from(result: Result<String, ExecutorError>) -> Self {
        match result {
            Ok(answer) => ExecutionOutcome::Completed(answer),
            Err(e) => ExecutionOutcome::Failed(e.to_string()),
        }
    }
}

/// Deterministic executor answering with a short analysis line.
///
/// Uses `context.topic` (or `context.title`) as a prefix when present.
#[derive(Debug, Clone)]
pub struct AnalysisExecutor {
    agent_id: String,
}

impl AnalysisExecutor {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }

    fn answer(&self, task: &str, context: &Payload) -> String {
        let topic = ["topic", "title"]
            .iter()
            .filter_map(|key| context.get(*key).and_then(Value::as_str))
            .find(|s| !s.is_empty());
        match topic {
            Some(topic) => format!("{topic}: {task} (analysis by agent {})", self.agent_id),
            None => format!("{task} (analysis by agent {})", self.agent_id),
        }
    }
}

impl TaskExecutor for AnalysisExecutor {
    fn execute<'a>(
        &'a self,
        task: &'a str,
        context: &'a Payload,
    ) -> Pin<Box<dyn Future<Output = Result<String, ExecutorError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.answer(task, context)) })
    }
}

/// Adapts an async closure into a `TaskExecutor`.
pub struct FnExecutor<F> {
    func: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(String, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ExecutorError>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(String, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ExecutorError>> + Send + 'static,
{
    fn execute<'a>(
        &'a self,
        task: &'a str,
        context: &'a Payload,
    ) -> Pin<Box<dyn Future<Output = Result<String, ExecutorError>> + Send + 'a>> {
        Box::pin((self.func)(task.to_string(), context.clone()))
    }
}
