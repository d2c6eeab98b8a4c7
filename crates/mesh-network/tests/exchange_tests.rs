//! Multi-node protocol tests over an in-memory transport.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{json, Value};

use mesh_consensus::{ConsensusEngine, RetentionPolicy};
use mesh_network::{
    AgentNetwork, AnalysisExecutor, NetworkError, PeerTransport, TaskStatus, TransportError,
};
use mesh_protocol::{AgentMessage, AgentPeer, MessageKind, Payload};

/// Routes envelopes straight into other in-process networks.
#[derive(Default)]
struct LoopbackTransport {
    routes: RwLock<HashMap<String, AgentNetwork>>,
    down: RwLock<HashSet<String>>,
}

impl LoopbackTransport {
    fn attach(&self, endpoint: &str, network: AgentNetwork) {
        let url = AgentPeer::new("", endpoint).exchange_url();
        self.routes.write().unwrap().insert(url, network);
    }

    fn take_down(&self, endpoint: &str) {
        let url = AgentPeer::new("", endpoint).exchange_url();
        self.down.write().unwrap().insert(url);
    }
}

impl PeerTransport for LoopbackTransport {
    fn send<'a>(
        &'a self,
        url: &'a str,
        message: &'a AgentMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            if self.down.read().unwrap().contains(url) {
                return Err(TransportError::Unreachable(url.to_string()));
            }
            let target = self.routes.read().unwrap().get(url).cloned();
            let Some(target) = target else {
                return Err(TransportError::Unreachable(url.to_string()));
            };
            let wire = AgentMessage::from_value(&message.to_value())
                .map_err(|e| TransportError::Unreachable(e.to_string()))?;
            Ok(target.handle_exchange(wire).await)
        })
    }
}

fn endpoint(id: &str) -> String {
    format!("mem://{id}")
}

/// Fully connected mesh of agents sharing one loopback transport.
fn mesh(ids: &[&str]) -> (Arc<LoopbackTransport>, Vec<AgentNetwork>) {
    let transport = Arc::new(LoopbackTransport::default());
    let networks: Vec<AgentNetwork> = ids
        .iter()
        .map(|id| {
            let peers = ids
                .iter()
                .filter(|other| *other != id)
                .map(|other| AgentPeer::new(*other, endpoint(other)))
                .collect();
            AgentNetwork::builder(*id, transport.clone())
                .peers(peers)
                .executor(Arc::new(AnalysisExecutor::new(*id)))
                .build()
        })
        .collect();
    for (id, network) in ids.iter().zip(&networks) {
        transport.attach(&endpoint(id), network.clone());
    }
    (transport, networks)
}

async fn drain(networks: &[AgentNetwork]) {
    for network in networks {
        network.drain_background().await;
    }
}

#[tokio::test]
async fn test_three_agents_converge_on_same_result() {
    let (_transport, nodes) = mesh(&["a", "b", "c"]);

    let mut context = Payload::new();
    context.insert("title".into(), json!("Pricing"));
    let (task_id, result) = nodes[0]
        .dispatch_task("estimate", context, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(
        result,
        "🤝 Pricing\n\
         a: Pricing: estimate (analysis by agent a)\n\
         b: Pricing: estimate (analysis by agent b)\n\
         c: Pricing: estimate (analysis by agent c)"
    );

    drain(&nodes).await;
    for node in &nodes {
        let record = node.get_task(&task_id).await.unwrap();
        assert_eq!(
            record.status,
            TaskStatus::Consensus,
            "node {}",
            node.agent_id()
        );
        assert_eq!(record.result.as_deref(), Some(result.as_str()));
        assert_eq!(record.owner.as_deref(), Some("a"));
        assert_eq!(record.task, "estimate");
        assert_eq!(record.responses.len(), 3);
        assert_eq!(
            node.wait_for_consensus(&task_id, Duration::from_millis(10)).await,
            Some(result.clone())
        );
    }

    for peer in nodes[0].peers_snapshot().await {
        assert!(peer.healthy, "peer {} should be healthy", peer.identifier);
        assert!(peer.last_error.is_none());
    }
}

#[tokio::test]
async fn test_unreachable_peer_times_out_then_late_result_completes() {
    let (transport, nodes) = mesh(&["a", "b", "c"]);
    transport.take_down(&endpoint("c"));

    let err = nodes[0]
        .dispatch_task("estimate", Payload::new(), Duration::from_millis(100))
        .await
        .unwrap_err();
    let task_id = match err {
        NetworkError::ConsensusTimeout { task_id, .. } => task_id,
        other => panic!("expected consensus timeout, got {other:?}"),
    };

    drain(&nodes).await;
    let record = nodes[0].get_task(&task_id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.responses.len(), 2);

    let c = nodes[0]
        .peers_snapshot()
        .await
        .into_iter()
        .find(|p| p.identifier == "c")
        .unwrap();
    assert!(!c.healthy);
    assert!(c.last_error.is_some());

    // A late vote from c still completes the task.
    let mut payload = Payload::new();
    payload.insert("result".into(), json!("late answer"));
    payload.insert("owner".into(), json!("a"));
    let ack = nodes[0]
        .handle_exchange(AgentMessage::new(MessageKind::Result, "c", &task_id, payload))
        .await;
    assert_eq!(
        ack,
        json!({"ok": true, "status": "recorded", "ready": true})
    );

    let result = nodes[0]
        .wait_for_consensus(&task_id, Duration::from_millis(10))
        .await
        .unwrap();
    assert!(result.ends_with("c: late answer"));
}

#[tokio::test]
async fn test_task_message_acknowledged_before_execution() {
    let (_transport, nodes) = mesh(&["a", "b"]);
    let mut payload = Payload::new();
    payload.insert("task".into(), json!("summarise"));
    payload.insert("owner".into(), json!("a"));

    let ack = nodes[1]
        .handle_exchange(AgentMessage::new(MessageKind::Task, "a", "t-42", payload))
        .await;
    assert_eq!(ack, json!({"ok": true, "task_id": "t-42"}));

    let record = nodes[1].get_task("t-42").await.unwrap();
    assert_eq!(record.owner.as_deref(), Some("a"));
    assert_eq!(record.task, "summarise");

    drain(&nodes).await;
    let record = nodes[1].get_task("t-42").await.unwrap();
    assert!(record.responses.contains_key("b"));
}

#[tokio::test]
async fn test_consensus_message_adopted_verbatim() {
    let (_transport, nodes) = mesh(&["a", "b"]);
    let mut payload = Payload::new();
    payload.insert("result".into(), json!("🤝 remote\nx: 1"));
    payload.insert("owner".into(), json!("x"));

    let ack = nodes[1]
        .handle_exchange(AgentMessage::new(MessageKind::Consensus, "a", "t-7", payload))
        .await;
    assert_eq!(ack, json!({"ok": true, "status": "synced"}));

    let record = nodes[1].get_task("t-7").await.unwrap();
    assert_eq!(record.status, TaskStatus::Consensus);
    assert_eq!(record.result.as_deref(), Some("🤝 remote\nx: 1"));
    assert_eq!(record.owner.as_deref(), Some("x"));
    assert!(record.responses.is_empty());

    // A second, different consensus does not replace the first.
    let mut payload = Payload::new();
    payload.insert("result".into(), json!("other"));
    nodes[1]
        .handle_exchange(AgentMessage::new(MessageKind::Consensus, "a", "t-7", payload))
        .await;
    assert_eq!(
        nodes[1].wait_for_consensus("t-7", Duration::from_millis(10)).await.as_deref(),
        Some("🤝 remote\nx: 1")
    );
}

#[tokio::test]
async fn test_submit_result_reports_outcome() {
    let (_transport, nodes) = mesh(&["a", "b"]);
    nodes[0].set_participants(2);

    let outcome = nodes[0]
        .submit_result("t-9", "42", Some("a"), "answer", &Payload::new())
        .await;
    assert!(!outcome.ready);
    assert_eq!(outcome.missing, 1);

    // b has heard about a's vote through the RESULT notification.
    let record = nodes[1].get_task("t-9").await.unwrap();
    assert_eq!(record.responses.get("a").map(String::as_str), Some("42"));
    assert_eq!(record.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_dispatch_survives_zero_retention_cap() {
    let engine = ConsensusEngine::default().with_retention(RetentionPolicy {
        max_finalized: Some(0),
        finalized_ttl: None,
    });
    let node = AgentNetwork::builder("solo", Arc::new(LoopbackTransport::default()))
        .executor(Arc::new(AnalysisExecutor::new("solo")))
        .consensus_engine(engine)
        .build();

    let (first, result) = node
        .dispatch_task("sum", Payload::new(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(result, "🤝 sum\nsolo: sum (analysis by agent solo)");
    assert!(node.get_task(&first).await.is_some());

    let (second, _) = node
        .dispatch_task("count", Payload::new(), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(node.get_task(&first).await.is_none());
    let latest = node.get_task(&second).await.unwrap();
    assert_eq!(latest.status, TaskStatus::Consensus);
}
