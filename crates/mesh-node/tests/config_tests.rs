use std::path::PathBuf;
use std::time::Duration;

use mesh_node::{Cli, ConfigError, NodeConfig};

fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

#[test]
fn test_defaults() {
    let config = NodeConfig::default();
    assert_eq!(config.agent.id, "agent");
    assert_eq!(config.network.listen_addr, "127.0.0.1:9380");
    assert_eq!(config.network.request_timeout_secs, 10);
    assert_eq!(config.network.max_concurrent_executions, 16);
    assert_eq!(config.consensus.dispatch_timeout_secs, 30);
    assert_eq!(config.logging.level, "info");
    assert!(config.retention().is_unbounded());
}

#[test]
fn test_load_full_file() {
    let (_dir, path) = write_config(
        r#"
[agent]
id = "alpha"

[network]
listen_addr = "0.0.0.0:9400"
neighbors = "beta=http://10.0.0.2:9380, gamma=http://10.0.0.3:9380"
participants = 2
request_timeout_secs = 3
max_concurrent_executions = 4

[consensus]
dispatch_timeout_secs = 12
max_finalized_tasks = 500
finalized_ttl_secs = 3600

[logging]
level = "debug"
"#,
    );

    let config = NodeConfig::load(&path).unwrap();
    assert_eq!(config.agent.id, "alpha");
    assert_eq!(config.network.listen_addr, "0.0.0.0:9400");
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.dispatch_timeout(), Duration::from_secs(12));

    let network = config.to_network_config();
    assert_eq!(network.agent_id, "alpha");
    assert_eq!(network.participants, Some(2));
    assert_eq!(network.request_timeout, Duration::from_secs(3));
    assert_eq!(network.max_concurrent_executions, 4);
    assert_eq!(network.retention.max_finalized, Some(500));
    assert_eq!(
        network.retention.finalized_ttl,
        Some(Duration::from_secs(3600))
    );
    assert!(network.neighbors.contains("gamma="));
}

#[test]
fn test_partial_file_keeps_defaults() {
    let config = NodeConfig::from_toml_str("[agent]\nid = \"solo\"\n").unwrap();
    assert_eq!(config.agent.id, "solo");
    assert_eq!(config.network, NodeConfig::default().network);
    assert_eq!(config.consensus, NodeConfig::default().consensus);
}

#[test]
fn test_invalid_file_reports_path() {
    let (_dir, path) = write_config("[network]\nrequest_timeout_secs = \"soon\"\n");
    let err = NodeConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("node.toml"));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = NodeConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_flags_beat_environment_beat_file() {
    let (_dir, path) = write_config(
        "[agent]\nid = \"file\"\n\
         [network]\nneighbors = \"x=http://x\"\nlisten_addr = \"127.0.0.1:1\"\n",
    );
    let mut config = NodeConfig::load(&path).unwrap();
    config.apply_env(|key| match key {
        "MESH_AGENT_ID" => Some("env".to_string()),
        "MESH_AGENT_NEIGHBORS" => Some("y=http://y".to_string()),
        _ => None,
    });
    assert_eq!(config.agent.id, "env");
    assert_eq!(config.network.neighbors, "y=http://y");
    assert_eq!(config.network.listen_addr, "127.0.0.1:1");

    let cli = Cli {
        agent_id: Some("flag".into()),
        log_level: Some("trace".into()),
        ..Cli::default()
    };
    config.apply_cli(&cli);
    assert_eq!(config.agent.id, "flag");
    assert_eq!(config.network.neighbors, "y=http://y");
    assert_eq!(config.logging.level, "trace");
}

#[test]
fn test_resolve_reads_explicit_file_and_applies_flags() {
    let (_dir, path) = write_config("[consensus]\ndispatch_timeout_secs = 7\n");
    let cli = Cli {
        config: Some(path.clone()),
        agent_id: Some("cli-agent".into()),
        neighbors: Some(String::new()),
        listen: Some("127.0.0.1:9999".into()),
        log_level: None,
    };

    let (config, used) = NodeConfig::resolve(&cli).unwrap();
    assert_eq!(used, Some(path));
    assert_eq!(config.agent.id, "cli-agent");
    assert_eq!(config.network.neighbors, "");
    assert_eq!(config.network.listen_addr, "127.0.0.1:9999");
    assert_eq!(config.consensus.dispatch_timeout_secs, 7);
}
