//! Cluster member registry and quorum arithmetic
//!
//! The registry is the harness's explicit view of the replica set: which
//! members exist, which of them hold data, and which are currently reachable.
//! It is passed into every fault injection call instead of living in global
//! state, so scenarios compose and can run against independent clusters.

pub mod config;

use tracing::{debug, info};

use crate::concern::WriteConcernLevel;
use crate::error::HarnessError;
use crate::fault::{FaultInjector, FaultOutcome};

/// Whether a member stores data or only votes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberRole {
    /// Voting member holding a copy of the data
    DataBearing,
    /// Voting member without data; cannot acknowledge writes
    Arbiter,
}

/// Network reachability of a member as last set by a fault injector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Isolated,
}

impl Reachability {
    /// Map an injector's `reachable` flag to a state
    pub fn from_bool(reachable: bool) -> Self {
        if reachable {
            Reachability::Reachable
        } else {
            Reachability::Isolated
        }
    }

    /// Whether the member is attached to the cluster network
    pub fn is_reachable(self) -> bool {
        self == Reachability::Reachable
    }
}

/// A single replica set member
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterMember {
    /// Replica set member `_id`
    pub id: u32,
    /// Logical name, also the container name on the cluster network
    pub name: String,
    /// `host:port` as seen from inside the cluster network
    pub host: String,
    /// Election priority weight
    pub priority: f64,
    pub role: MemberRole,
    pub reachability: Reachability,
}

impl ClusterMember {
    /// Create a reachable data-bearing member
    pub fn data_bearing(id: u32, name: &str, host: &str, priority: f64) -> Self {
        ClusterMember {
            id,
            name: name.to_string(),
            host: host.to_string(),
            priority,
            role: MemberRole::DataBearing,
            reachability: Reachability::Reachable,
        }
    }

    /// Create a reachable arbiter (priority 0)
    pub fn arbiter(id: u32, name: &str, host: &str) -> Self {
        ClusterMember {
            id,
            name: name.to_string(),
            host: host.to_string(),
            priority: 0.0,
            role: MemberRole::Arbiter,
            reachability: Reachability::Reachable,
        }
    }

    /// Whether this member votes without holding data
    pub fn is_arbiter(&self) -> bool {
        self.role == MemberRole::Arbiter
    }

    /// Whether the member is currently reachable
    pub fn is_reachable(&self) -> bool {
        self.reachability.is_reachable()
    }
}

/// Ordered set of replica set members with their reachability
#[derive(Clone, Debug, PartialEq)]
pub struct MemberRegistry {
    members: Vec<ClusterMember>,
}

impl MemberRegistry {
    /// Create a registry over `members`, in replica set order
    pub fn new(members: Vec<ClusterMember>) -> Self {
        MemberRegistry { members }
    }

    /// The five-member reference topology: four data-bearing members
    /// (`mongo1` preferred as primary) and one arbiter.
    pub fn reference() -> Self {
        MemberRegistry::new(vec![
            ClusterMember::data_bearing(0, "mongo1", "mongo1:27017", 2.0),
            ClusterMember::data_bearing(1, "mongo2", "mongo2:27017", 1.0),
            ClusterMember::data_bearing(2, "mongo3", "mongo3:27017", 1.0),
            ClusterMember::data_bearing(3, "mongo4", "mongo4:27017", 1.0),
            ClusterMember::arbiter(4, "mongo-arbiter", "mongo-arbiter:27017"),
        ])
    }

    /// All members in replica set order
    pub fn members(&self) -> &[ClusterMember] {
        &self.members
    }

    /// Look up a member by name
    pub fn get(&self, name: &str) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Member names in replica set order
    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    /// Number of members, arbiters included
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the registry has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Every member votes, arbiters included
    pub fn voting_count(&self) -> usize {
        self.members.len()
    }

    /// Acknowledgments needed for a majority: strictly more than half of
    /// the voting members
    pub fn write_majority(&self) -> usize {
        self.voting_count() / 2 + 1
    }

    /// Members that hold data and can acknowledge writes
    pub fn data_bearing(&self) -> impl Iterator<Item = &ClusterMember> {
        self.members.iter().filter(|m| !m.is_arbiter())
    }

    /// Data-bearing members that are currently reachable
    pub fn reachable_data_bearing(&self) -> impl Iterator<Item = &ClusterMember> {
        self.data_bearing().filter(|m| m.is_reachable())
    }

    /// Members currently cut off from the cluster network
    pub fn isolated(&self) -> impl Iterator<Item = &ClusterMember> {
        self.members.iter().filter(|m| !m.is_reachable())
    }

    /// Whether the reachable data-bearing members can acknowledge a majority
    /// write. Arbiters count toward the required total but never acknowledge.
    pub fn can_acknowledge_majority(&self) -> bool {
        self.reachable_data_bearing().count() >= self.write_majority()
    }

    /// Whether the reachable voting members (arbiters included) form a
    /// majority. A primary that loses this steps down.
    pub fn has_voting_quorum(&self) -> bool {
        self.members.iter().filter(|m| m.is_reachable()).count() >= self.write_majority()
    }

    /// Write concern applied when an operation names none: `w: 1` when the
    /// arbiters leave too few data-bearing members to outnumber a majority,
    /// `majority` otherwise.
    pub fn implicit_default_write_concern(&self) -> WriteConcernLevel {
        let arbiters = self.members.iter().filter(|m| m.is_arbiter()).count();
        let data_bearing = self.voting_count() - arbiters;
        if arbiters > 0 && data_bearing <= self.write_majority() {
            WriteConcernLevel::single_node()
        } else {
            WriteConcernLevel::Majority
        }
    }

    /// Highest-priority data-bearing member; ties go to the lowest id
    pub fn primary(&self) -> Option<&ClusterMember> {
        self.data_bearing().fold(None, |best: Option<&ClusterMember>, m| match best {
            Some(b) if b.priority > m.priority => Some(b),
            Some(b) if b.priority == m.priority && b.id <= m.id => Some(b),
            _ => Some(m),
        })
    }

    /// Record a reachability change without going through an injector
    pub fn mark(&mut self, name: &str, reachability: Reachability) -> Result<(), HarnessError> {
        let member = self
            .members
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| HarnessError::UnknownMember(name.to_string()))?;
        member.reachability = reachability;
        Ok(())
    }

    /// Connect or disconnect a member through `injector`.
    ///
    /// The registry follows the injector's outcome: `Applied` and
    /// `AlreadyInState` both leave the member in the requested state, while a
    /// `Failed` outcome leaves the recorded state untouched. Failures are
    /// returned as outcomes, not errors.
    pub async fn set_reachability(
        &mut self,
        injector: &dyn FaultInjector,
        name: &str,
        reachable: bool,
    ) -> Result<FaultOutcome, HarnessError> {
        let member = self
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownMember(name.to_string()))?;

        let outcome = injector.set_reachability(&member, reachable).await;
        debug!(member = %name, reachable, ?outcome, "reachability change");

        if outcome.is_effective() {
            self.mark(name, Reachability::from_bool(reachable))?;
        }
        Ok(outcome)
    }

    /// Disconnect `name` from the cluster network
    pub async fn isolate(
        &mut self,
        injector: &dyn FaultInjector,
        name: &str,
    ) -> Result<FaultOutcome, HarnessError> {
        self.set_reachability(injector, name, false).await
    }

    /// Reconnect `name` to the cluster network
    pub async fn heal(
        &mut self,
        injector: &dyn FaultInjector,
        name: &str,
    ) -> Result<FaultOutcome, HarnessError> {
        self.set_reachability(injector, name, true).await
    }

    /// Restore reachability of every member, whatever the registry believes
    /// its current state is.
    pub async fn heal_all(&mut self, injector: &dyn FaultInjector) -> Vec<(String, FaultOutcome)> {
        let mut outcomes = Vec::with_capacity(self.members.len());
        for idx in 0..self.members.len() {
            let member = self.members[idx].clone();
            let outcome = injector.set_reachability(&member, true).await;
            if outcome.is_effective() {
                self.members[idx].reachability = Reachability::Reachable;
            }
            outcomes.push((member.name, outcome));
        }
        info!(members = outcomes.len(), "healed cluster network");
        outcomes
    }
}

impl Default for MemberRegistry {
    fn default() -> Self {
        Self::reference()
    }
}
