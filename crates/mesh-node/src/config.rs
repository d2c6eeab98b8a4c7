//! Node configuration (TOML file, environment, command line).

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use mesh_consensus::RetentionPolicy;
use mesh_network::NetworkConfig;

use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "MESH_CONFIG";
pub const AGENT_ID_ENV: &str = "MESH_AGENT_ID";
pub const NEIGHBORS_ENV: &str = "MESH_AGENT_NEIGHBORS";
pub const LISTEN_ADDR_ENV: &str = "MESH_LISTEN_ADDR";

/// Agent mesh node.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "mesh-node", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Identifier this agent uses on the mesh
    #[arg(long)]
    pub agent_id: Option<String>,

    /// Neighbours as comma-separated `name=url` pairs
    #[arg(long)]
    pub neighbors: Option<String>,

    /// Address for the HTTP listener, e.g. 0.0.0.0:9380
    #[arg(long)]
    pub listen: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub agent: AgentSection,
    pub network: NetworkSection,
    pub consensus: ConsensusSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub id: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            id: "agent".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub listen_addr: String,
    /// Comma-separated `name=url` pairs.
    pub neighbors: String,
    /// Expected responders per task; unset means every neighbour plus self.
    pub participants: Option<usize>,
    pub request_timeout_secs: u64,
    pub max_concurrent_executions: usize,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9380".to_string(),
            neighbors: String::new(),
            participants: None,
            request_timeout_secs: 10,
            max_concurrent_executions: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSection {
    /// How long `POST /api/tasks` waits for a result.
    pub dispatch_timeout_secs: u64,
    pub max_finalized_tasks: Option<usize>,
    pub finalized_ttl_secs: Option<u64>,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            dispatch_timeout_secs: 30,
            max_finalized_tasks: None,
            finalized_ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve the full configuration for a node process.
    ///
    /// File (if any) first, then environment overrides, then flags.
    /// Returns the file that was read alongside the configuration.
    pub fn resolve(cli: &Cli) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = locate(cli.config.as_deref());
        let mut config = match &path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.apply_cli(cli);
        Ok((config, path))
    }

    /// Apply `MESH_*` overrides; empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(id) = get(AGENT_ID_ENV) {
            self.agent.id = id;
        }
        if let Some(neighbors) = get(NEIGHBORS_ENV) {
            self.network.neighbors = neighbors;
        }
        if let Some(addr) = get(LISTEN_ADDR_ENV) {
            self.network.listen_addr = addr;
        }
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(id) = &cli.agent_id {
            self.agent.id = id.clone();
        }
        if let Some(neighbors) = &cli.neighbors {
            self.network.neighbors = neighbors.clone();
        }
        if let Some(addr) = &cli.listen {
            self.network.listen_addr = addr.clone();
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_finalized: self.consensus.max_finalized_tasks,
            finalized_ttl: self.consensus.finalized_ttl_secs.map(Duration::from_secs),
        }
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.consensus.dispatch_timeout_secs)
    }

    pub fn to_network_config(&self) -> NetworkConfig {
        NetworkConfig {
            agent_id: self.agent.id.clone(),
            neighbors: self.network.neighbors.clone(),
            participants: self.network.participants,
            request_timeout: Duration::from_secs(self.network.request_timeout_secs),
            max_concurrent_executions: self.network.max_concurrent_executions.max(1),
            retention: self.retention(),
        }
    }
}

/// Configuration file to read: explicit path, then `$MESH_CONFIG`, then
/// `<config_dir>/mesh/node.toml` if it exists.
pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
    locate_with(
        explicit,
        std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        dirs::config_dir(),
    )
}

fn locate_with(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    config_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = from_env.filter(|p| !p.as_os_str().is_empty()) {
        return Some(path);
    }
    config_dir
        .map(|dir| dir.join("mesh").join("node.toml"))
        .filter(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let found = locate_with(
            Some(Path::new("/tmp/explicit.toml")),
            Some(PathBuf::from("/tmp/env.toml")),
            None,
        );
        assert_eq!(found, Some(PathBuf::from("/tmp/explicit.toml")));
    }

    #[test]
    fn test_env_path_before_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("mesh")).unwrap();
        std::fs::write(dir.path().join("mesh/node.toml"), "").unwrap();

        let found = locate_with(
            None,
            Some(PathBuf::from("/tmp/env.toml")),
            Some(dir.path().into()),
        );
        assert_eq!(found, Some(PathBuf::from("/tmp/env.toml")));

        let found = locate_with(None, None, Some(dir.path().into()));
        assert_eq!(found, Some(dir.path().join("mesh/node.toml")));
    }

    #[test]
    fn test_missing_default_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(locate_with(None, None, Some(dir.path().into())), None);
        assert_eq!(locate_with(None, Some(PathBuf::new()), None), None);
    }

    #[test]
    fn test_env_overrides_ignore_blank_values() {
        let mut config = NodeConfig::default();
        config.apply_env(|key| match key {
            AGENT_ID_ENV => Some("env-agent".into()),
            NEIGHBORS_ENV => Some("  ".into()),
            _ => None,
        });
        assert_eq!(config.agent.id, "env-agent");
        assert_eq!(config.network.neighbors, "");
        assert_eq!(config.network.listen_addr, "127.0.0.1:9380");
    }
}
