//! HTTP surface: the peer exchange endpoint plus admin APIs.

use std::future::Future;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use mesh_network::NetworkError;
use mesh_orchestrator::{AgentUpdate, Metadata};
use mesh_protocol::{new_message_id, AgentMessage, Payload, EXCHANGE_PATH, INVALID_JSON};

use crate::context::AppContext;

const DEFAULT_TASK_LIST_LIMIT: usize = 50;

type ApiResponse = (StatusCode, Json<Value>);

fn error_response(status: StatusCode, error: impl Into<String>) -> ApiResponse {
    (status, Json(json!({"ok": false, "error": error.into()})))
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route(EXCHANGE_PATH, post(agent_exchange))
        .route("/api/health", get(api_health))
        .route("/api/peers", get(api_peers))
        .route("/api/heartbeat", post(api_heartbeat))
        .route("/api/tasks", get(api_tasks).post(api_dispatch_task))
        .route("/api/tasks/:task_id", get(api_task))
        .route("/api/orchestrator", get(api_orchestrator))
        .route("/api/orchestrator/agents", post(api_register_agent))
        .route(
            "/api/orchestrator/agents/:agent_id",
            delete(api_unregister_agent),
        )
        .route(
            "/api/orchestrator/agents/:agent_id/heartbeat",
            post(api_agent_heartbeat),
        )
        .route("/api/orchestrator/tasks", post(api_submit_task))
        .route(
            "/api/orchestrator/tasks/:task_id/complete",
            post(api_complete_task),
        )
        .with_state(ctx)
}

pub struct NodeServer {
    bind_addr: String,
    ctx: AppContext,
}

impl NodeServer {
    pub fn new(bind_addr: String, ctx: AppContext) -> Self {
        Self { bind_addr, ctx }
    }

    /// Serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let agent_id = self.ctx.network.agent_id().to_string();
        let app = router(self.ctx);

        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, agent_id = %agent_id, "Mesh node listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Peer exchange
// ----------------------------------------------------------------------

async fn agent_exchange(State(ctx): State<AppContext>, body: Bytes) -> ApiResponse {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected exchange body");
            return error_response(StatusCode::BAD_REQUEST, INVALID_JSON);
        }
    };
    let message = match AgentMessage::from_value(&value) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected exchange envelope");
            return error_response(StatusCode::BAD_REQUEST, e.code());
        }
    };
    (StatusCode::OK, Json(ctx.network.handle_exchange(message).await))
}

// ----------------------------------------------------------------------
// Network admin
// ----------------------------------------------------------------------

async fn api_health(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({"ok": true, "service": "mesh-node", "agent_id": ctx.network.agent_id()}))
}

async fn api_peers(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({
        "agent_id": ctx.network.agent_id(),
        "participants": ctx.network.participants(),
        "peers": ctx.network.peers_snapshot().await,
    }))
}

async fn api_heartbeat(State(ctx): State<AppContext>) -> Json<Value> {
    let peers = ctx.network.send_heartbeats().await;
    Json(json!({"ok": true, "peers": peers}))
}

#[derive(Deserialize)]
struct TaskListQuery {
    limit: Option<usize>,
}

async fn api_tasks(
    State(ctx): State<AppContext>,
    Query(query): Query<TaskListQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(DEFAULT_TASK_LIST_LIMIT);
    Json(json!({"tasks": ctx.network.list_tasks(limit).await}))
}

async fn api_task(
    State(ctx): State<AppContext>,
    AxumPath(task_id): AxumPath<String>,
) -> ApiResponse {
    match ctx.network.get_task(&task_id).await {
        Some(record) => (StatusCode::OK, Json(json!(record))),
        None => error_response(StatusCode::NOT_FOUND, "unknown_task"),
    }
}

#[derive(Deserialize)]
struct DispatchRequest {
    task: String,
    #[serde(default)]
    context: Payload,
    /// Overrides the configured dispatch timeout.
    timeout_secs: Option<f64>,
}

async fn api_dispatch_task(
    State(ctx): State<AppContext>,
    Json(req): Json<DispatchRequest>,
) -> ApiResponse {
    if req.task.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing_task");
    }
    let timeout = match req.timeout_secs.map(Duration::try_from_secs_f64) {
        None => ctx.dispatch_timeout,
        Some(Ok(timeout)) => timeout,
        Some(Err(_)) => return error_response(StatusCode::BAD_REQUEST, "invalid_timeout"),
    };

    match ctx.network.dispatch_task(&req.task, req.context, timeout).await {
        Ok((task_id, result)) => (
            StatusCode::OK,
            Json(json!({"ok": true, "task_id": task_id, "result": result})),
        ),
        Err(NetworkError::ConsensusTimeout { task_id, .. }) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({"ok": false, "error": "consensus_timeout", "task_id": task_id})),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Task dispatch failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ----------------------------------------------------------------------
// Orchestrator admin
// ----------------------------------------------------------------------

async fn api_orchestrator(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!(ctx.orchestrator.get_status_snapshot().await))
}

fn default_capacity() -> u32 {
    1
}

#[derive(Deserialize)]
struct RegisterAgentRequest {
    agent_id: String,
    #[serde(default = "default_capacity")]
    capacity: u32,
    #[serde(default)]
    priority: i64,
}

async fn api_register_agent(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterAgentRequest>,
) -> ApiResponse {
    if req.agent_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing_agent_id");
    }
    let agent = ctx
        .orchestrator
        .register_agent(&req.agent_id, req.capacity, req.priority)
        .await;
    (StatusCode::OK, Json(json!({"ok": true, "agent": agent})))
}

async fn api_unregister_agent(
    State(ctx): State<AppContext>,
    AxumPath(agent_id): AxumPath<String>,
) -> ApiResponse {
    match ctx.orchestrator.unregister_agent(&agent_id).await {
        Some(agent) => (
            StatusCode::OK,
            Json(json!({"ok": true, "requeued": agent.assigned.len()})),
        ),
        None => error_response(StatusCode::NOT_FOUND, "unknown_agent"),
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AgentHeartbeatRequest {
    capacity: Option<u32>,
    priority: Option<i64>,
    active: Option<bool>,
}

async fn api_agent_heartbeat(
    State(ctx): State<AppContext>,
    AxumPath(agent_id): AxumPath<String>,
    Json(req): Json<AgentHeartbeatRequest>,
) -> ApiResponse {
    let update = AgentUpdate {
        capacity: req.capacity,
        priority: req.priority,
        active: req.active,
    };
    let agent = ctx.orchestrator.heartbeat(&agent_id, update).await;
    (StatusCode::OK, Json(json!({"ok": true, "agent": agent})))
}

#[derive(Deserialize)]
struct SubmitTaskRequest {
    task_id: Option<String>,
    #[serde(default)]
    payload: Metadata,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    meta: Metadata,
}

async fn api_submit_task(
    State(ctx): State<AppContext>,
    Json(req): Json<SubmitTaskRequest>,
) -> ApiResponse {
    let task_id = req
        .task_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(new_message_id);
    let assigned = ctx
        .orchestrator
        .submit_task(&task_id, req.payload, req.priority, req.meta)
        .await;
    let status = if assigned.is_some() { "assigned" } else { "queued" };
    (
        StatusCode::OK,
        Json(json!({"ok": true, "task_id": task_id, "status": status, "assignment": assigned})),
    )
}

fn default_success() -> bool {
    true
}

#[derive(Deserialize)]
struct CompleteTaskRequest {
    agent_id: String,
    #[serde(default = "default_success")]
    success: bool,
}

async fn api_complete_task(
    State(ctx): State<AppContext>,
    AxumPath(task_id): AxumPath<String>,
    Json(req): Json<CompleteTaskRequest>,
) -> ApiResponse {
    let completed = ctx
        .orchestrator
        .complete_task(&req.agent_id, &task_id, req.success)
        .await;
    (StatusCode::OK, Json(json!({"ok": true, "completed": completed})))
}
