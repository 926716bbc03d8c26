//! Docker network fault injection
//!
//! Isolates a member by detaching its container from the cluster network
//! (`docker network disconnect`) and heals it by re-attaching it
//! (`docker network connect`). The exit status and stderr are the only
//! feedback; a non-zero exit is logged and turned into a [`FaultOutcome`].

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use super::{FaultInjector, FaultOutcome};
use crate::cluster::ClusterMember;

/// Fault injector backed by the `docker` CLI
#[derive(Clone, Debug)]
pub struct DockerNetwork {
    /// Network the members are attached to
    network: String,
    /// Executable to run (default: `docker`)
    binary: String,
}

impl DockerNetwork {
    /// Create an injector for `network` using the `docker` executable
    pub fn new(network: &str) -> Self {
        DockerNetwork {
            network: network.to_string(),
            binary: "docker".to_string(),
        }
    }

    /// Use a different executable, e.g. `podman`
    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }

    fn verb(reachable: bool) -> &'static str {
        if reachable {
            "connect"
        } else {
            "disconnect"
        }
    }

    async fn run(&self, verb: &str, container: &str) -> FaultOutcome {
        let output = Command::new(&self.binary)
            .args(["network", verb, &self.network, container])
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(%container, verb, error = %e, "failed to run {}", self.binary);
                return FaultOutcome::Failed(e.to_string());
            }
        };

        if output.status.success() {
            info!(%container, network = %self.network, "docker network {}", verb);
            return FaultOutcome::Applied;
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let outcome = classify_failure(verb, &stderr);
        match &outcome {
            FaultOutcome::AlreadyInState => {
                info!(%container, verb, "member already in requested state")
            }
            _ => warn!(%container, verb, %stderr, "docker network {} failed", verb),
        }
        outcome
    }
}

/// Map a failed `docker network` invocation to an outcome.
///
/// Disconnecting a detached container and connecting an attached one are
/// no-ops, not failures.
pub(crate) fn classify_failure(verb: &str, stderr: &str) -> FaultOutcome {
    let already = match verb {
        "disconnect" => stderr.contains("is not connected"),
        "connect" => stderr.contains("already exists"),
        _ => false,
    };
    if already {
        FaultOutcome::AlreadyInState
    } else if stderr.is_empty() {
        FaultOutcome::Failed(format!("docker network {} exited with an error", verb))
    } else {
        FaultOutcome::Failed(stderr.to_string())
    }
}

#[async_trait]
impl FaultInjector for DockerNetwork {
    async fn set_reachability(&self, member: &ClusterMember, reachable: bool) -> FaultOutcome {
        self.run(Self::verb(reachable), &member.name).await
    }
}
