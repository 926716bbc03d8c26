//! Harness configuration
//!
//! Loaded from an optional TOML file; every field defaults to the reference
//! five-member replica set, so an empty file (or none) is a valid config.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::{ClusterMember, MemberRegistry, MemberRole, Reachability};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One `[[members]]` entry
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MemberConfig {
    pub id: u32,
    pub name: String,
    pub host: String,
    #[serde(default = "default_priority")]
    pub priority: f64,
    #[serde(default)]
    pub arbiter_only: bool,
}

fn default_priority() -> f64 {
    1.0
}

/// Timing knobs for scenarios
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Bound on a whole scenario, including blocked majority writes (default: 5000ms)
    pub scenario_deadline_ms: u64,
    /// Sleep that lets asynchronous replication converge (default: 3000ms)
    pub grace_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            scenario_deadline_ms: 5000,
            grace_interval_ms: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Replica-set-aware connection string used by scenarios
    pub uri: String,
    /// Connection string for administrative commands (bootstrap, status)
    pub admin_uri: String,
    /// Bypass replica set discovery and talk to the seed host only
    pub direct_connection: bool,
    /// Replica set name (`_id` of the replica set document)
    pub replica_set: String,
    /// Docker network the members are attached to
    pub network: String,
    pub database: String,
    pub collection: String,
    pub timing: TimingConfig,
    pub members: Vec<MemberConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            uri: "mongodb://localhost:27018/?replicaSet=rs0".to_string(),
            admin_uri: "mongodb://localhost:27018".to_string(),
            direct_connection: true,
            replica_set: "rs0".to_string(),
            network: "mongo-cluster".to_string(),
            database: "test_database".to_string(),
            collection: "test_collection".to_string(),
            timing: TimingConfig::default(),
            members: MemberRegistry::reference()
                .members()
                .iter()
                .map(|m| MemberConfig {
                    id: m.id,
                    name: m.name.clone(),
                    host: m.host.clone(),
                    priority: m.priority,
                    arbiter_only: m.is_arbiter(),
                })
                .collect(),
        }
    }
}

impl HarnessConfig {
    /// Load from `path`, or return the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(p) => {
                let data = fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&data).map_err(|err| match err {
                    ConfigError::Parse { source, .. } => ConfigError::Parse {
                        path: p.to_path_buf(),
                        source,
                    },
                    other => other,
                })?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(data: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(data).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.members.is_empty() {
            return Err(ConfigError::Invalid("no replica set members".to_string()));
        }
        if self.members.iter().all(|m| m.arbiter_only) {
            return Err(ConfigError::Invalid(
                "at least one data-bearing member is required".to_string(),
            ));
        }
        let mut names: Vec<&str> = self.members.iter().map(|m| m.name.as_str()).collect();
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid(format!("duplicate member name '{}'", w[0])));
        }
        // replSetInitiate rejects repeated `_id`s
        let mut ids: Vec<u32> = self.members.iter().map(|m| m.id).collect();
        ids.sort_unstable();
        if let Some(w) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid(format!("duplicate member id {}", w[0])));
        }
        Ok(())
    }

    /// Build the member registry; every member starts reachable
    pub fn registry(&self) -> MemberRegistry {
        MemberRegistry::new(
            self.members
                .iter()
                .map(|m| ClusterMember {
                    id: m.id,
                    name: m.name.clone(),
                    host: m.host.clone(),
                    priority: if m.arbiter_only { 0.0 } else { m.priority },
                    role: if m.arbiter_only {
                        MemberRole::Arbiter
                    } else {
                        MemberRole::DataBearing
                    },
                    reachability: Reachability::Reachable,
                })
                .collect(),
        )
    }

    /// Default bound on a whole scenario
    pub fn scenario_deadline(&self) -> Duration {
        Duration::from_millis(self.timing.scenario_deadline_ms)
    }

    /// Sleep between reads that wait for replication
    pub fn grace_interval(&self) -> Duration {
        Duration::from_millis(self.timing.grace_interval_ms)
    }

    /// Override the scenario connection string
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Override the docker network used for fault injection
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_topology() {
        let config = HarnessConfig::default();
        assert_eq!(config.replica_set, "rs0");
        assert_eq!(config.network, "mongo-cluster");
        assert_eq!(config.scenario_deadline(), Duration::from_secs(5));
        assert_eq!(config.grace_interval(), Duration::from_secs(3));
        assert_eq!(config.registry(), MemberRegistry::reference());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = HarnessConfig::from_toml("").unwrap();
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = HarnessConfig::from_toml(
            r#"
            network = "rs-net"

            [timing]
            grace_interval_ms = 500

            [[members]]
            id = 0
            name = "a"
            host = "a:27017"
            priority = 2

            [[members]]
            id = 1
            name = "b"
            host = "b:27017"

            [[members]]
            id = 2
            name = "arb"
            host = "arb:27017"
            arbiter_only = true
            "#,
        )
        .unwrap();

        assert_eq!(config.network, "rs-net");
        assert_eq!(config.grace_interval(), Duration::from_millis(500));
        assert_eq!(config.scenario_deadline(), Duration::from_secs(5));

        let registry = config.registry();
        assert_eq!(registry.len(), 3);
        assert!(registry.get("arb").unwrap().is_arbiter());
        assert_eq!(registry.get("b").unwrap().priority, 1.0);
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = HarnessConfig::from_toml(
            r#"
            [[members]]
            id = 0
            name = "a"
            host = "a:27017"

            [[members]]
            id = 1
            name = "a"
            host = "a2:27017"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = HarnessConfig::from_toml(
            r#"
            [[members]]
            id = 0
            name = "a"
            host = "a:27017"

            [[members]]
            id = 0
            name = "b"
            host = "b:27017"
            "#,
        )
        .unwrap_err();
        match err {
            ConfigError::Invalid(reason) => assert_eq!(reason, "duplicate member id 0"),
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = HarnessConfig::load(Some(Path::new("/nonexistent/harness.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
