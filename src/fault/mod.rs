//! Fault injection against cluster members
//!
//! A fault injector connects or disconnects a member from the cluster
//! network. Injectors hold no state of their own; the caller's
//! [`MemberRegistry`](crate::cluster::MemberRegistry) records the result.
//!
//! - `DockerNetwork`: shells out to `docker network connect/disconnect`
//! - `SimulatedReplicaSet` (in `store::simulated`) implements the trait too

pub mod docker;

pub use docker::DockerNetwork;

use async_trait::async_trait;

use crate::cluster::ClusterMember;

/// Result of a single connect/disconnect action
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The member's reachability changed
    Applied,
    /// The member was already in the requested state
    AlreadyInState,
    /// The action failed; the member's state is unknown
    Failed(String),
}

impl FaultOutcome {
    /// True when the member is now in the requested state
    pub fn is_effective(&self) -> bool {
        !matches!(self, FaultOutcome::Failed(_))
    }
}

/// Connects and disconnects members from the cluster network.
///
/// Implementations must be idempotent: asking for the state a member is
/// already in returns `AlreadyInState`. Failures are reported through the
/// outcome and never panic or return early from the calling scenario.
#[async_trait]
pub trait FaultInjector: Send + Sync {
    async fn set_reachability(&self, member: &ClusterMember, reachable: bool) -> FaultOutcome;
}
