use mesh_consensus::{ConsensusEngine, ConsensusState};
use mesh_protocol::Payload;

#[test]
fn test_two_participant_scenario() {
    let mut engine = ConsensusEngine::default();
    engine.expect("t1", Some("a1"), 2, "sum", &Payload::new());

    let first = engine.register_response("t1", "a1", "5");
    assert!(!first.ready);
    assert_eq!(first.missing, 1);
    assert!(first.result.is_none());

    let second = engine.register_response("t1", "a2", "7");
    assert!(second.ready);
    assert!(!second.already_final);
    assert!(second.newly_final());
    assert_eq!(second.result.as_deref(), Some("🤝 sum\na1: 5\na2: 7"));
    assert_eq!(
        engine.get("t1").unwrap().final_result(),
        Some("🤝 sum\na1: 5\na2: 7")
    );
}

#[test]
fn test_duplicate_agent_overwrites() {
    let mut engine = ConsensusEngine::default();
    engine.expect("t1", Some("a1"), 2, "sum", &Payload::new());

    engine.register_response("t1", "a1", "5");
    let outcome = engine.register_response("t1", "a1", "6");
    assert!(!outcome.ready);
    assert_eq!(outcome.missing, 1);
    assert_eq!(outcome.responses.len(), 1);
    assert_eq!(outcome.responses["a1"], "6");
}

#[test]
fn test_expected_participants_never_shrinks() {
    let mut engine = ConsensusEngine::default();
    engine.expect("t1", None, 3, "", &Payload::new());
    engine.expect("t1", None, 1, "", &Payload::new());
    engine.expect("t1", None, 5, "", &Payload::new());
    let state = engine.expect("t1", None, 2, "", &Payload::new());
    assert_eq!(state.expected_participants, 5);
}

#[test]
fn test_zero_participants_clamped() {
    let mut engine = ConsensusEngine::default();
    let state = engine.expect("t1", None, 0, "", &Payload::new());
    assert_eq!(state.expected_participants, 1);
}

#[test]
fn test_at_most_one_finalization() {
    let mut engine = ConsensusEngine::default();
    engine.expect("t1", None, 2, "sum", &Payload::new());
    engine.register_response("t1", "a1", "5");
    let done = engine.register_response("t1", "a2", "7");
    let result = done.result.clone();

    for (agent, value) in [("a1", "99"), ("a3", "1"), ("a2", "7")] {
        let again = engine.register_response("t1", agent, value);
        assert!(again.ready);
        assert!(again.already_final);
        assert!(!again.newly_final());
        assert_eq!(again.missing, 0);
        assert_eq!(again.result, result);
    }
    let state = engine.get("t1").unwrap();
    assert_eq!(state.final_result(), result.as_deref());
    assert_eq!(state.responses.len(), 2);
}

#[test]
fn test_threshold_counts_distinct_agents() {
    let mut engine = ConsensusEngine::default();
    engine.expect("t1", None, 3, "vote", &Payload::new());

    assert!(!engine.register_response("t1", "a", "1").ready);
    assert!(!engine.register_response("t1", "a", "1").ready);
    assert!(!engine.register_response("t1", "b", "1").ready);
    assert!(!engine.register_response("t1", "b", "2").ready);
    assert!(engine.register_response("t1", "c", "1").ready);
}

#[test]
fn test_aggregation_independent_of_arrival_order() {
    let responses = [("carol", "3"), ("alice", "1"), ("bob", "2"), ("dave", "4")];
    let orders: [[usize; 4]; 3] = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2]];

    let results: Vec<String> = orders
        .iter()
        .map(|order| {
            let mut engine = ConsensusEngine::default();
            engine.expect("t", None, responses.len(), "rank", &Payload::new());
            let mut last = None;
            for &i in order {
                let (agent, value) = responses[i];
                last = engine.register_response("t", agent, value).result;
            }
            last.unwrap()
        })
        .collect();

    assert_eq!(results[0], "🤝 rank\nalice: 1\nbob: 2\ncarol: 3\ndave: 4");
    assert!(results.iter().all(|r| r == &results[0]));
}

#[test]
fn test_custom_aggregator() {
    let mut engine = ConsensusEngine::new(|state: &ConsensusState| {
        state.responses.values().cloned().collect::<Vec<_>>().join("+")
    });
    engine.expect("t1", None, 2, "", &Payload::new());
    engine.register_response("t1", "b", "2");
    let outcome = engine.register_response("t1", "a", "1");
    assert_eq!(outcome.result.as_deref(), Some("1+2"));
}

#[tokio::test]
async fn test_waiter_observes_finalization() {
    let mut engine = ConsensusEngine::default();
    engine.expect("t1", None, 1, "sum", &Payload::new());
    let mut watch = engine.get("t1").unwrap().subscribe();

    let waiter = tokio::spawn(async move {
        watch.wait_for(Option::is_some).await.map(|v| v.clone()).ok().flatten()
    });
    engine.register_response("t1", "a1", "5");
    assert_eq!(waiter.await.unwrap().as_deref(), Some("🤝 sum\na1: 5"));
}
