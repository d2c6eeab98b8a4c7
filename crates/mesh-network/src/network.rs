//! The `AgentNetwork` coordinator.
//!
//! Consensus and audit-record mutation happens under a single ledger lock
//! held only for synchronous bookkeeping; every peer send happens after the
//! lock is released.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;

use mesh_consensus::{ConsensusEngine, ConsensusOutcome, FinalityWatch};
use mesh_protocol::{new_message_id, parse_peers, AgentMessage, AgentPeer, MessageKind, Payload};

use crate::{
    ExecutionOutcome, HttpTransport, NetworkConfig, NetworkError, PeerTransport, TaskExecutor,
    TaskRecord,
};

const HEARTBEAT_TASK_ID: &str = "heartbeat";

/// Consensus engine plus the audit records that mirror it.
struct Ledger {
    consensus: ConsensusEngine,
    records: HashMap<String, TaskRecord>,
}

impl Ledger {
    fn ensure_record(
        &mut self,
        task_id: &str,
        owner: Option<&str>,
        task: &str,
        context: &Payload,
    ) -> &mut TaskRecord {
        let record = self
            .records
            .entry(task_id.to_string())
            .or_insert_with(|| TaskRecord::new(task_id, owner, task, context));
        record.merge(owner, task, context);
        record
    }

    /// Apply retention to consensus states and drop the matching records.
    /// `keep` is the task finalised by the current call and is never evicted.
    fn prune(&mut self, keep: &str) {
        for task_id in self.consensus.prune(Some(keep)) {
            self.records.remove(&task_id);
        }
    }
}

struct NetworkInner {
    agent_id: String,
    peers: RwLock<BTreeMap<String, AgentPeer>>,
    executor: RwLock<Option<Arc<dyn TaskExecutor>>>,
    transport: Arc<dyn PeerTransport>,
    participants: AtomicUsize,
    ledger: Mutex<Ledger>,
    background: Mutex<JoinSet<()>>,
    execution_slots: Arc<Semaphore>,
}

/// Coordinates task exchange between neighbouring agents.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct AgentNetwork {
    inner: Arc<NetworkInner>,
}

/// Builder for `AgentNetwork`.
pub struct AgentNetworkBuilder {
    agent_id: String,
    transport: Arc<dyn PeerTransport>,
    peers: Vec<AgentPeer>,
    executor: Option<Arc<dyn TaskExecutor>>,
    participants: Option<usize>,
    consensus: Option<ConsensusEngine>,
    max_concurrent_executions: usize,
}

impl AgentNetworkBuilder {
    pub fn peers(mut self, peers: Vec<AgentPeer>) -> Self {
        self.peers = peers;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn participants(mut self, participants: usize) -> Self {
        self.participants = Some(participants);
        self
    }

    pub fn consensus_engine(mut self, engine: ConsensusEngine) -> Self {
        self.consensus = Some(engine);
        self
    }

    pub fn max_concurrent_executions(mut self, limit: usize) -> Self {
        self.max_concurrent_executions = limit.max(1);
        self
    }

    pub fn build(self) -> AgentNetwork {
        let peers: BTreeMap<String, AgentPeer> = self
            .peers
            .into_iter()
            .map(|peer| (peer.identifier.clone(), peer))
            .collect();
        let participants = self.participants.unwrap_or(peers.len() + 1).max(1);

        AgentNetwork {
            inner: Arc::new(NetworkInner {
                agent_id: self.agent_id,
                peers: RwLock::new(peers),
                executor: RwLock::new(self.executor),
                transport: self.transport,
                participants: AtomicUsize::new(participants),
                ledger: Mutex::new(Ledger {
                    consensus: self.consensus.unwrap_or_default(),
                    records: HashMap::new(),
                }),
                background: Mutex::new(JoinSet::new()),
                execution_slots: Arc::new(Semaphore::new(self.max_concurrent_executions)),
            }),
        }
    }
}

impl AgentNetwork {
    pub fn builder(
        agent_id: impl Into<String>,
        transport: Arc<dyn PeerTransport>,
    ) -> AgentNetworkBuilder {
        AgentNetworkBuilder {
            agent_id: agent_id.into(),
            transport,
            peers: Vec::new(),
            executor: None,
            participants: None,
            consensus: None,
            max_concurrent_executions: NetworkConfig::default().max_concurrent_executions,
        }
    }

    /// Build a network talking HTTP to the neighbours named in `config`.
    pub fn from_config(
        config: &NetworkConfig,
        executor: Option<Arc<dyn TaskExecutor>>,
    ) -> Result<Self, NetworkError> {
        let peers = parse_peers(&config.neighbors);
        let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
        let participants = config.participants.unwrap_or(peers.len() + 1);

        tracing::info!(
            agent_id = %config.agent_id,
            peers = peers.len(),
            participants,
            "Agent network configured"
        );

        let consensus = ConsensusEngine::default().with_retention(config.retention.clone());
        let mut builder = Self::builder(config.agent_id.clone(), transport)
            .peers(peers)
            .participants(participants)
            .consensus_engine(consensus)
            .max_concurrent_executions(config.max_concurrent_executions);
        if let Some(executor) = executor {
            builder = builder.executor(executor);
        }
        Ok(builder.build())
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    pub fn participants(&self) -> usize {
        self.inner.participants.load(Ordering::SeqCst).max(1)
    }

    pub fn set_participants(&self, value: usize) {
        self.inner.participants.store(value.max(1), Ordering::SeqCst);
    }

    pub async fn register_executor(&self, executor: Arc<dyn TaskExecutor>) {
        *self.inner.executor.write().await = Some(executor);
    }

    pub async fn peers_snapshot(&self) -> Vec<AgentPeer> {
        self.inner.peers.read().await.values().cloned().collect()
    }

    pub async fn get_task(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.ledger.lock().await.records.get(task_id).cloned()
    }

    /// Most recently created audit records first.
    pub async fn list_tasks(&self, limit: usize) -> Vec<TaskRecord> {
        let ledger = self.inner.ledger.lock().await;
        let mut records: Vec<TaskRecord> = ledger.records.values().cloned().collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        records.truncate(limit);
        records
    }

    // ------------------------------------------------------------------
    // Core protocol
    // ------------------------------------------------------------------

    /// Broadcast a new task to every peer and run it locally.
    ///
    /// The local answer is submitted like any other vote, so the broadcaster
    /// always counts as one participant. Returns the generated task id.
    pub async fn broadcast_task(&self, task: &str, context: Payload) -> String {
        let (task_id, _finality) = self.start_task(task, context).await;
        task_id
    }

    /// Broadcast a task and wait for its consensus.
    ///
    /// Fails with `ConsensusTimeout` if no result arrives within `timeout`;
    /// the task keeps converging in the background.
    pub async fn dispatch_task(
        &self,
        task: &str,
        context: Payload,
        timeout: Duration,
    ) -> Result<(String, String), NetworkError> {
        let (task_id, finality) = self.start_task(task, context).await;
        match await_finality(finality, timeout).await {
            Some(result) => Ok((task_id, result)),
            None => Err(NetworkError::ConsensusTimeout { task_id, timeout }),
        }
    }

    /// Wait up to `timeout` for a task's final result.
    ///
    /// Returns `None` for unknown tasks and on timeout.
    pub async fn wait_for_consensus(&self, task_id: &str, timeout: Duration) -> Option<String> {
        let finality = {
            let ledger = self.inner.ledger.lock().await;
            ledger.consensus.get(task_id)?.subscribe()
        };
        await_finality(finality, timeout).await
    }

    /// Register, broadcast and locally execute a new task.
    async fn start_task(&self, task: &str, context: Payload) -> (String, FinalityWatch) {
        let task_id = new_message_id();
        let agent_id = self.agent_id().to_string();

        let mut payload = Payload::new();
        payload.insert("task".into(), json!(task));
        payload.insert("context".into(), Value::Object(context.clone()));
        payload.insert("owner".into(), json!(agent_id));
        let message = AgentMessage::new(MessageKind::Task, &agent_id, &task_id, payload);

        // Subscribed before any vote is cast, so retention cannot hide the result.
        let participants = self.participants();
        let finality = {
            let mut ledger = self.inner.ledger.lock().await;
            let finality = ledger
                .consensus
                .expect(&task_id, Some(&agent_id), participants, task, &context)
                .subscribe();
            ledger.ensure_record(&task_id, Some(&agent_id), task, &context);
            finality
        };

        tracing::info!(task_id = %task_id, participants, "Broadcasting task");
        self.broadcast(&message).await;
        self.execute_task(&message).await;
        (task_id, finality)
    }

    /// Submit this agent's own answer for a task.
    ///
    /// Peers are always told about the raw result; if this call is the one
    /// that completes consensus, the final result is broadcast as well.
    pub async fn submit_result(
        &self,
        task_id: &str,
        result: &str,
        owner: Option<&str>,
        task: &str,
        context: &Payload,
    ) -> ConsensusOutcome {
        let agent_id = self.agent_id().to_string();
        let (outcome, state_owner) = {
            let mut guard = self.inner.ledger.lock().await;
            let ledger = &mut *guard;
            let state = ledger
                .consensus
                .expect(task_id, owner, self.participants(), task, context);
            let state_owner = state.owner.clone();
            let state_task = state.task.clone();
            let state_context = state.context.clone();

            let outcome = ledger.consensus.register_response(task_id, &agent_id, result);
            let finalized_at = ledger.consensus.get(task_id).and_then(|s| s.finalized_at());

            let record =
                ledger.ensure_record(task_id, state_owner.as_deref(), &state_task, &state_context);
            record.responses.insert(agent_id.clone(), result.to_string());
            if outcome.ready && outcome.result.is_some() {
                record.mark_consensus(outcome.result.as_deref(), finalized_at);
            }
            if outcome.newly_final() {
                ledger.prune(task_id);
            }
            (outcome, state_owner)
        };

        self.notify_result(task_id, result, owner).await;
        if outcome.newly_final() {
            if let Some(final_result) = outcome.result.as_deref().filter(|r| !r.is_empty()) {
                let owner = owner.or(state_owner.as_deref());
                self.broadcast_consensus(task_id, final_result, owner).await;
            }
        }
        outcome
    }

    /// Dispatch an incoming envelope by kind and produce the JSON ack.
    pub async fn handle_exchange(&self, message: AgentMessage) -> Value {
        tracing::debug!(
            kind = %message.kind(),
            sender = %message.sender(),
            task_id = %message.task_id(),
            "Exchange message received"
        );
        match message.kind() {
            MessageKind::Task => self.handle_task_message(message).await,
            MessageKind::Result => self.handle_result_message(&message).await,
            MessageKind::Consensus => self.handle_consensus_message(&message).await,
            MessageKind::Heartbeat => self.handle_heartbeat_message(&message).await,
        }
    }

    /// Broadcast a heartbeat to every neighbour, updating peer health.
    pub async fn send_heartbeats(&self) -> Vec<AgentPeer> {
        let mut payload = Payload::new();
        payload.insert("participants".into(), json!(self.participants()));
        let message = AgentMessage::new(
            MessageKind::Heartbeat,
            self.agent_id(),
            HEARTBEAT_TASK_ID,
            payload,
        );
        self.broadcast(&message).await;
        self.peers_snapshot().await
    }

    /// Wait for every background execution spawned so far to finish.
    pub async fn drain_background(&self) {
        loop {
            let mut running = {
                let mut background = self.inner.background.lock().await;
                if background.is_empty() {
                    return;
                }
                std::mem::take(&mut *background)
            };
            while let Some(joined) = running.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "Background execution aborted");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Message handlers
    // ------------------------------------------------------------------

    async fn handle_task_message(&self, message: AgentMessage) -> Value {
        let owner = message
            .payload_str("owner")
            .unwrap_or(message.sender())
            .to_string();
        let task = message.payload_str("task").unwrap_or_default().to_string();
        let context = message.payload_map("context");
        let task_id = message.task_id().to_string();

        {
            let mut ledger = self.inner.ledger.lock().await;
            ledger
                .consensus
                .expect(&task_id, Some(&owner), self.participants(), &task, &context);
            ledger.ensure_record(&task_id, Some(&owner), &task, &context);
        }

        let network = self.clone();
        let slots = Arc::clone(&self.inner.execution_slots);
        let mut background = self.inner.background.lock().await;
        while background.try_join_next().is_some() {}
        background.spawn(async move {
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };
            network.execute_task(&message).await;
        });

        json!({"ok": true, "task_id": task_id})
    }

    async fn handle_result_message(&self, message: &AgentMessage) -> Value {
        let owner = message.payload_str("owner").map(str::to_string);
        let result = message.payload_str("result").unwrap_or_default().to_string();
        let task_id = message.task_id();
        let sender = message.sender();

        let outcome = {
            let mut guard = self.inner.ledger.lock().await;
            let ledger = &mut *guard;
            let state = ledger.consensus.expect(
                task_id,
                owner.as_deref(),
                self.participants(),
                "",
                &Payload::new(),
            );
            let state_owner = state.owner.clone();
            let state_task = state.task.clone();
            let state_context = state.context.clone();

            let record =
                ledger.ensure_record(task_id, state_owner.as_deref(), &state_task, &state_context);
            record.responses.insert(sender.to_string(), result.clone());

            let outcome = ledger.consensus.register_response(task_id, sender, &result);
            if outcome.newly_final() {
                let finalized_at = ledger.consensus.get(task_id).and_then(|s| s.finalized_at());
                if let Some(record) = ledger.records.get_mut(task_id) {
                    record.mark_consensus(outcome.result.as_deref(), finalized_at);
                }
                ledger.prune(task_id);
            }
            outcome
        };

        if outcome.newly_final() {
            if let Some(final_result) = outcome.result.as_deref().filter(|r| !r.is_empty()) {
                self.broadcast_consensus(task_id, final_result, owner.as_deref())
                    .await;
            }
        }

        json!({"ok": true, "status": "recorded", "ready": outcome.ready})
    }

    async fn handle_consensus_message(&self, message: &AgentMessage) -> Value {
        let result = message.payload_str("result").unwrap_or_default();
        let owner = message.payload_str("owner");
        let task_id = message.task_id();

        let mut guard = self.inner.ledger.lock().await;
        let ledger = &mut *guard;
        let state = ledger.consensus.accept_final(task_id, result);
        let state_owner = state.owner.clone().or_else(|| owner.map(str::to_string));
        let state_task = state.task.clone();
        let state_context = state.context.clone();
        let final_result = state.final_result().map(str::to_string);
        let finalized_at = state.finalized_at();

        let record =
            ledger.ensure_record(task_id, state_owner.as_deref(), &state_task, &state_context);
        record.mark_consensus(final_result.as_deref(), finalized_at);
        ledger.prune(task_id);

        json!({"ok": true, "status": "synced"})
    }

    async fn handle_heartbeat_message(&self, message: &AgentMessage) -> Value {
        let mut peers = self.inner.peers.write().await;
        if let Some(peer) = peers.get_mut(message.sender()) {
            peer.mark_success();
        }
        json!({"ok": true, "status": "alive"})
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Run the local executor for a TASK envelope and submit its vote.
    ///
    /// Executor errors and panics become a failed vote rather than aborting.
    async fn execute_task(&self, message: &AgentMessage) {
        let Some(executor) = self.inner.executor.read().await.clone() else {
            tracing::debug!(
                task_id = %message.task_id(),
                "No executor registered; skipping local run"
            );
            return;
        };

        let task = message.payload_str("task").unwrap_or_default().to_string();
        let context = message.payload_map("context");
        let owner = message.payload_str("owner").map(str::to_string);

        let outcome = match AssertUnwindSafe(executor.execute(&task, &context))
            .catch_unwind()
            .await
        {
            Ok(result) => ExecutionOutcome::from(result),
            Err(_) => ExecutionOutcome::Failed("executor panicked".to_string()),
        };
        if let ExecutionOutcome::Failed(error) = &outcome {
            tracing::warn!(task_id = %message.task_id(), error = %error, "Task execution failed");
        }

        self.submit_result(
            message.task_id(),
            &outcome.vote(),
            owner.as_deref(),
            &task,
            &context,
        )
        .await;
    }

    async fn notify_result(&self, task_id: &str, result: &str, owner: Option<&str>) {
        let mut payload = Payload::new();
        payload.insert("result".into(), json!(result));
        payload.insert("owner".into(), json!(owner));
        let message = AgentMessage::new(MessageKind::Result, self.agent_id(), task_id, payload);
        self.broadcast(&message).await;
    }

    async fn broadcast_consensus(&self, task_id: &str, result: &str, owner: Option<&str>) {
        let mut payload = Payload::new();
        payload.insert("result".into(), json!(result));
        payload.insert("owner".into(), json!(owner));
        let message = AgentMessage::new(MessageKind::Consensus, self.agent_id(), task_id, payload);
        tracing::info!(task_id = %task_id, "Broadcasting consensus");
        self.broadcast(&message).await;
    }

    /// Send to every peer concurrently; failures are recorded per peer.
    async fn broadcast(&self, message: &AgentMessage) {
        let targets: Vec<(String, String)> = {
            let peers = self.inner.peers.read().await;
            peers
                .values()
                .map(|peer| (peer.identifier.clone(), peer.exchange_url()))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let transport = &self.inner.transport;
        let sends = targets.iter().map(|(peer_id, url)| async move {
            (peer_id, transport.send(url, message).await)
        });
        let results = join_all(sends).await;

        let mut peers = self.inner.peers.write().await;
        for (peer_id, result) in results {
            let Some(peer) = peers.get_mut(peer_id) else {
                continue;
            };
            match result {
                Ok(_) => peer.mark_success(),
                Err(e) => {
                    tracing::warn!(
                        peer = %peer_id,
                        kind = %message.kind(),
                        task_id = %message.task_id(),
                        error = %e,
                        "Failed to deliver envelope"
                    );
                    peer.mark_failure(e.to_string());
                }
            }
        }
    }
}

async fn await_finality(mut finality: FinalityWatch, timeout: Duration) -> Option<String> {
    let finalized = finality.wait_for(Option::is_some);
    let seen = match tokio::time::timeout(timeout, finalized).await {
        Ok(Ok(result)) => result.clone(),
        _ => None,
    };
    seen
}
