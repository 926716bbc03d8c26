//! Replica set bootstrap and status
//!
//! `initiate` submits the replica set document built from the member
//! registry; a set that is already initialized counts as success.
//! `replica_set_status` reports each member's state for observability only;
//! scenarios never assert on it.

use mongodb::bson::{self, doc, Document};
use mongodb::error::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::cluster::MemberRegistry;
use crate::store::ClusterClient;

/// Server error code for `replSetInitiate` on an initialized set
const ALREADY_INITIALIZED: i32 = 23;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("replSetInitiate failed: {0}")]
    Initiate(#[source] mongodb::error::Error),
    #[error("replSetGetStatus failed: {0}")]
    Status(#[source] mongodb::error::Error),
    #[error("malformed replSetGetStatus reply: {0}")]
    MalformedStatus(#[from] bson::de::Error),
    #[error("failed to encode replica set document: {0}")]
    Encode(#[from] bson::ser::Error),
}

/// One entry of the replica set document
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemberDocument {
    #[serde(rename = "_id")]
    pub id: u32,
    pub host: String,
    pub priority: f64,
    #[serde(rename = "arbiterOnly", skip_serializing_if = "std::ops::Not::not")]
    pub arbiter_only: bool,
}

/// Argument to `replSetInitiate`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReplicaSetConfig {
    #[serde(rename = "_id")]
    pub name: String,
    pub members: Vec<MemberDocument>,
}

impl ReplicaSetConfig {
    pub fn from_registry(name: &str, registry: &MemberRegistry) -> Self {
        ReplicaSetConfig {
            name: name.to_string(),
            members: registry
                .members()
                .iter()
                .map(|m| MemberDocument {
                    id: m.id,
                    host: m.host.clone(),
                    priority: m.priority,
                    arbiter_only: m.is_arbiter(),
                })
                .collect(),
        }
    }

    pub fn to_document(&self) -> Result<Document, BootstrapError> {
        Ok(bson::to_document(self)?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitiateOutcome {
    Initiated,
    AlreadyInitialized,
}

/// Initiate the replica set; an already initialized set is not an error
pub async fn initiate(
    client: &ClusterClient,
    config: &ReplicaSetConfig,
) -> Result<InitiateOutcome, BootstrapError> {
    let command = doc! { "replSetInitiate": config.to_document()? };

    match client.admin().run_command(command).await {
        Ok(_) => {
            info!(replica_set = %config.name, members = config.members.len(), "replica set initialized");
            Ok(InitiateOutcome::Initiated)
        }
        Err(e) if is_already_initialized(&e) => {
            info!(replica_set = %config.name, "replica set already initialized");
            Ok(InitiateOutcome::AlreadyInitialized)
        }
        Err(e) => {
            warn!(replica_set = %config.name, error = %e, "replica set initialization failed");
            Err(BootstrapError::Initiate(e))
        }
    }
}

fn is_already_initialized(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Command(cmd) => {
            cmd.code == ALREADY_INITIALIZED || cmd.message.contains("already initialized")
        }
        _ => false,
    }
}

/// Per-member entry of `replSetGetStatus`
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MemberStatus {
    pub name: String,
    #[serde(rename = "stateStr")]
    pub state: String,
    #[serde(default)]
    pub health: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ReplicaSetStatus {
    pub set: String,
    pub members: Vec<MemberStatus>,
}

impl ReplicaSetStatus {
    pub fn from_document(document: Document) -> Result<Self, BootstrapError> {
        Ok(bson::from_document(document)?)
    }

    pub fn primary(&self) -> Option<&MemberStatus> {
        self.members.iter().find(|m| m.state == "PRIMARY")
    }
}

pub async fn replica_set_status(client: &ClusterClient) -> Result<ReplicaSetStatus, BootstrapError> {
    let reply = client
        .admin()
        .run_command(doc! { "replSetGetStatus": 1 })
        .await
        .map_err(BootstrapError::Status)?;
    let status = ReplicaSetStatus::from_document(reply)?;
    for member in &status.members {
        info!(member = %member.name, state = %member.state, "replica set member");
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_config_document() {
        let config = ReplicaSetConfig::from_registry("rs0", &MemberRegistry::reference());
        let document = config.to_document().unwrap();

        assert_eq!(document.get_str("_id").unwrap(), "rs0");
        let members = document.get_array("members").unwrap();
        assert_eq!(members.len(), 5);

        let first = members[0].as_document().unwrap();
        assert_eq!(first.get_str("host").unwrap(), "mongo1:27017");
        assert_eq!(first.get_f64("priority").unwrap(), 2.0);
        assert!(!first.contains_key("arbiterOnly"));

        let arbiter = members[4].as_document().unwrap();
        assert_eq!(arbiter.get_str("host").unwrap(), "mongo-arbiter:27017");
        assert!(arbiter.get_bool("arbiterOnly").unwrap());
        assert_eq!(arbiter.get_f64("priority").unwrap(), 0.0);
    }

    #[test]
    fn test_status_parsing() {
        let reply = doc! {
            "set": "rs0",
            "ok": 1.0,
            "members": [
                { "_id": 0, "name": "mongo1:27017", "stateStr": "PRIMARY", "health": 1.0 },
                { "_id": 1, "name": "mongo2:27017", "stateStr": "SECONDARY", "health": 1.0 },
                { "_id": 4, "name": "mongo-arbiter:27017", "stateStr": "ARBITER" },
            ],
        };
        let status = ReplicaSetStatus::from_document(reply).unwrap();
        assert_eq!(status.set, "rs0");
        assert_eq!(status.members.len(), 3);
        assert_eq!(status.primary().unwrap().name, "mongo1:27017");
        assert_eq!(status.members[2].health, None);
    }

    #[test]
    fn test_status_missing_members_is_malformed() {
        let err = ReplicaSetStatus::from_document(doc! { "set": "rs0" }).unwrap_err();
        assert!(matches!(err, BootstrapError::MalformedStatus(_)));
    }
}
