//! Replica-set consistency harness
//!
//! Building blocks for checking how write and read concern levels of a
//! quorum-replicated document store behave under network partitions:
//! a cluster member registry with quorum arithmetic, fault injectors that
//! isolate and heal members, and store adapters that issue operations at an
//! explicit concern.

pub mod bootstrap;
pub mod cluster;
pub mod concern;
pub mod document;
pub mod error;
pub mod fault;
pub mod store;

pub use cluster::config::HarnessConfig;
pub use cluster::{ClusterMember, MemberRegistry, MemberRole, Reachability};
pub use concern::{Concerns, ReadConcernLevel, WriteConcernLevel};
pub use document::{sample_people, Person};
pub use error::HarnessError;
pub use fault::{FaultInjector, FaultOutcome};
pub use store::{DocumentStore, InsertSummary, ScopedHandle, StoreError};
