//! In-process replica set model
//!
//! `SimulatedReplicaSet` stands in for a real cluster in tests that should
//! not need Docker. It models only what the concern scenarios observe:
//!
//! - the primary applies every write as soon as it is accepted
//! - a reachable secondary applies each oplog entry `replication_lag` after
//!   the entry was written (or after the secondary was last reconnected,
//!   whichever is later); an isolated secondary applies nothing
//! - the majority commit point is the longest oplog prefix applied on
//!   `write_majority()` data-bearing members
//! - local reads return the primary's documents, majority reads the
//!   committed prefix
//! - a write waits until its entry is applied on as many data-bearing
//!   members as the write concern requires, however long that takes
//!
//! Elections are not modelled: the primary is fixed. While it is reachable
//! but cannot see a voting majority, majority writes wait for quorum to come
//! back and every other write fails with `NotPrimary`. An isolated primary
//! rejects every write.
//!
//! It also implements [`FaultInjector`], so the same value can be handed to a
//! scenario as both its store and its network.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::{DocumentStore, InsertSummary, StoreError};
use crate::cluster::{ClusterMember, MemberRegistry, Reachability};
use crate::concern::{Concerns, ReadConcernLevel, WriteConcernLevel};
use crate::document::Person;
use crate::fault::{FaultInjector, FaultOutcome};

/// Default delay between a write on the primary and its arrival on a secondary
pub const DEFAULT_REPLICATION_LAG: Duration = Duration::from_millis(500);

struct OplogEntry {
    doc: Person,
    written_at: Instant,
}

struct SimState {
    registry: MemberRegistry,
    oplog: Vec<OplogEntry>,
    /// Number of oplog entries applied, per data-bearing member
    applied: HashMap<String, usize>,
    /// When each member last became reachable
    reachable_since: HashMap<String, Instant>,
}

impl SimState {
    fn primary_name(&self) -> Option<String> {
        self.registry.primary().map(|m| m.name.clone())
    }

    fn primary_reachable(&self) -> bool {
        self.registry
            .primary()
            .map(|m| m.is_reachable())
            .unwrap_or(false)
    }

    /// The primary can accept writes only while it is reachable and sees a
    /// voting majority
    fn writable_primary(&self) -> Option<String> {
        let primary = self.registry.primary()?;
        if primary.is_reachable() && self.registry.has_voting_quorum() {
            Some(primary.name.clone())
        } else {
            None
        }
    }

    /// A majority write waits instead of failing while the primary is
    /// reachable but short of voting quorum
    fn awaits_quorum(&self, concern: WriteConcernLevel) -> bool {
        concern == WriteConcernLevel::Majority
            && self.primary_reachable()
            && !self.registry.has_voting_quorum()
    }

    /// Earliest time `member` can apply oplog entry `index`
    fn apply_time(&self, member: &str, index: usize, lag: Duration) -> Option<Instant> {
        let entry = self.oplog.get(index)?;
        let since = *self.reachable_since.get(member)?;
        Some(entry.written_at.max(since) + lag)
    }

    /// Bring every reachable secondary up to date as of `now`
    fn advance(&mut self, now: Instant, lag: Duration) {
        let primary = self.primary_name();
        let primary_reachable = self.primary_reachable();

        let secondaries: Vec<String> = self
            .registry
            .reachable_data_bearing()
            .map(|m| m.name.clone())
            .filter(|name| Some(name) != primary.as_ref())
            .collect();

        // isolated primary has nobody to replicate to
        if !primary_reachable {
            return;
        }

        for name in secondaries {
            let mut applied = self.applied.get(&name).copied().unwrap_or(0);
            while applied < self.oplog.len() {
                match self.apply_time(&name, applied, lag) {
                    Some(at) if at <= now => applied += 1,
                    _ => break,
                }
            }
            self.applied.insert(name, applied);
        }
    }

    fn acks_for(&self, index: usize) -> usize {
        self.registry
            .data_bearing()
            .filter(|m| self.applied.get(&m.name).copied().unwrap_or(0) > index)
            .count()
    }

    /// Longest oplog prefix applied on a majority of voting members
    fn commit_point(&self) -> usize {
        let mut applied: Vec<usize> = self
            .registry
            .data_bearing()
            .map(|m| self.applied.get(&m.name).copied().unwrap_or(0))
            .collect();
        applied.sort_unstable_by(|a, b| b.cmp(a));
        applied
            .get(self.registry.write_majority() - 1)
            .copied()
            .unwrap_or(0)
    }

    /// Next instant at which a reachable member still missing entry `index` gets it
    fn next_apply_time(&self, index: usize, lag: Duration) -> Option<Instant> {
        if !self.primary_reachable() {
            return None;
        }
        self.registry
            .reachable_data_bearing()
            .filter(|m| self.applied.get(&m.name).copied().unwrap_or(0) <= index)
            .filter_map(|m| self.apply_time(&m.name, index, lag))
            .min()
    }
}

/// Replica set model backed by in-memory state
pub struct SimulatedReplicaSet {
    state: Mutex<SimState>,
    /// Signalled whenever reachability changes
    changed: Notify,
    replication_lag: Duration,
}

impl SimulatedReplicaSet {
    pub fn new(registry: MemberRegistry, replication_lag: Duration) -> Self {
        let now = Instant::now();
        let applied = registry
            .data_bearing()
            .map(|m| (m.name.clone(), 0))
            .collect();
        let reachable_since = registry
            .members()
            .iter()
            .map(|m| (m.name.clone(), now))
            .collect();

        SimulatedReplicaSet {
            state: Mutex::new(SimState {
                registry,
                oplog: Vec::new(),
                applied,
                reachable_since,
            }),
            changed: Notify::new(),
            replication_lag,
        }
    }

    /// The reference five-member topology with the default replication lag
    pub fn reference() -> Self {
        Self::new(MemberRegistry::reference(), DEFAULT_REPLICATION_LAG)
    }

    pub fn replication_lag(&self) -> Duration {
        self.replication_lag
    }

    /// Snapshot of the model's own view of member reachability
    pub fn registry(&self) -> MemberRegistry {
        self.state.lock().registry.clone()
    }

    /// Number of oplog entries applied on `member`, as of now
    pub fn applied_on(&self, member: &str) -> Option<usize> {
        let mut state = self.state.lock();
        state.advance(Instant::now(), self.replication_lag);
        state.applied.get(member).copied()
    }

    /// Majority commit point, as of now
    pub fn commit_point(&self) -> usize {
        let mut state = self.state.lock();
        state.advance(Instant::now(), self.replication_lag);
        state.commit_point()
    }

    /// Append `docs` to the primary's oplog; returns the index of the last
    /// entry, or `None` when a majority write has to wait for voting quorum
    fn accept_write(
        &self,
        docs: &[Person],
        concern: WriteConcernLevel,
    ) -> Result<Option<usize>, StoreError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.advance(now, self.replication_lag);

        if state.awaits_quorum(concern) {
            return Ok(None);
        }
        let primary = state.writable_primary().ok_or(StoreError::NotPrimary)?;

        if let WriteConcernLevel::Nodes(n) = concern {
            let available = state.registry.data_bearing().count();
            if n as usize > available {
                return Err(StoreError::UnsatisfiableWriteConcern {
                    requested: n,
                    available,
                });
            }
        }

        for doc in docs {
            let mut doc = doc.clone();
            doc.id.get_or_insert_with(ObjectId::new);
            state.oplog.push(OplogEntry {
                doc,
                written_at: now,
            });
        }
        let len = state.oplog.len();
        state.applied.insert(primary, len);
        Ok(Some(len.saturating_sub(1)))
    }
}

#[async_trait]
impl DocumentStore for SimulatedReplicaSet {
    async fn insert_many(
        &self,
        docs: &[Person],
        concerns: &Concerns,
    ) -> Result<InsertSummary, StoreError> {
        if docs.is_empty() {
            return Ok(InsertSummary { inserted: 0 });
        }

        let concern = match concerns.write {
            Some(concern) => concern,
            None => self.state.lock().registry.implicit_default_write_concern(),
        };
        let last = loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.accept_write(docs, concern)? {
                Some(last) => break last,
                None => {
                    debug!("primary lacks voting quorum; majority write waiting");
                    notified.await;
                }
            }
        };

        loop {
            // Register for reachability changes before inspecting state so a
            // heal between the check and the wait is not lost.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut state = self.state.lock();
                state.advance(Instant::now(), self.replication_lag);
                let required = concern.required_acks(state.registry.write_majority());
                let acks = state.acks_for(last);
                if acks >= required {
                    debug!(acks, required, "write concern satisfied");
                    return Ok(InsertSummary {
                        inserted: docs.len(),
                    });
                }
                state.next_apply_time(last, self.replication_lag)
            };

            match next {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = &mut notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn find(&self, concerns: &Concerns) -> Result<Vec<Person>, StoreError> {
        let mut state = self.state.lock();
        state.advance(Instant::now(), self.replication_lag);

        let visible = match concerns.read.unwrap_or(ReadConcernLevel::Local) {
            ReadConcernLevel::Local => state.oplog.len(),
            ReadConcernLevel::Majority => state.commit_point(),
        };
        Ok(state.oplog[..visible]
            .iter()
            .map(|entry| entry.doc.clone())
            .collect())
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        let removed = state.oplog.len() as u64;
        state.oplog.clear();
        for applied in state.applied.values_mut() {
            *applied = 0;
        }
        Ok(removed)
    }
}

#[async_trait]
impl FaultInjector for SimulatedReplicaSet {
    async fn set_reachability(&self, member: &ClusterMember, reachable: bool) -> FaultOutcome {
        let now = Instant::now();
        let target = Reachability::from_bool(reachable);
        {
            let mut state = self.state.lock();
            let current = match state.registry.get(&member.name) {
                Some(m) => m.reachability,
                None => return FaultOutcome::Failed(format!("no such member: {}", member.name)),
            };
            if current == target {
                return FaultOutcome::AlreadyInState;
            }

            // settle replication up to the moment of the change
            state.advance(now, self.replication_lag);
            if state.registry.mark(&member.name, target).is_err() {
                return FaultOutcome::Failed(format!("no such member: {}", member.name));
            }
            if reachable {
                state.reachable_since.insert(member.name.clone(), now);
            }
        }
        self.changed.notify_waiters();
        FaultOutcome::Applied
    }
}
