//! Store abstraction for concern-scoped document operations
//!
//! `DocumentStore` is the seam between scenarios and the replicated store:
//! - `MongoStore`: a real replica set through the MongoDB driver
//! - `SimulatedReplicaSet`: an in-process model of the same replica set
//!
//! Scenarios never talk to a store directly; they go through a
//! [`ScopedHandle`], which carries the concern overrides for the operations
//! issued through it.

pub mod mongo;
pub mod simulated;

pub use mongo::{ClusterClient, MongoStore};
pub use simulated::SimulatedReplicaSet;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::concern::{Concerns, ReadConcernLevel, WriteConcernLevel};
use crate::document::Person;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failure reported by the driver or the server
    #[error("driver error: {0}")]
    Driver(#[from] mongodb::error::Error),
    /// The write concern was not satisfied before the caller's deadline.
    /// The store was still waiting; it did not reject the write.
    #[error("write concern not satisfied within {elapsed:?}")]
    DeadlineElapsed { elapsed: Duration },
    /// No member can accept writes
    #[error("no primary available")]
    NotPrimary,
    /// The write concern asks for more acknowledgments than there are data-bearing members
    #[error("write concern w:{requested} exceeds {available} data-bearing members")]
    UnsatisfiableWriteConcern { requested: u32, available: usize },
}

impl StoreError {
    pub fn is_deadline(&self) -> bool {
        matches!(self, StoreError::DeadlineElapsed { .. })
    }
}

/// Acknowledged result of an `insert_many`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
}

/// A collection in a replicated store with per-operation concerns
///
/// `insert_many` waits as long as the write concern requires; it never
/// gives up on its own when quorum is missing. Callers bound it through
/// [`ScopedHandle::insert_many`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert `docs` and wait for the write concern in `concerns`
    async fn insert_many(
        &self,
        docs: &[Person],
        concerns: &Concerns,
    ) -> Result<InsertSummary, StoreError>;

    /// All documents visible at the read concern in `concerns`
    async fn find(&self, concerns: &Concerns) -> Result<Vec<Person>, StoreError>;

    /// Remove every document, returning how many were removed
    async fn clear(&self) -> Result<u64, StoreError>;
}

/// A store handle with concern overrides.
///
/// Scoping returns a new handle; the parent keeps its own concerns, so
/// handles used by different scenarios never leak settings into each other.
#[derive(Clone)]
pub struct ScopedHandle {
    store: Arc<dyn DocumentStore>,
    concerns: Concerns,
}

impl ScopedHandle {
    /// Unscoped handle: every operation uses the store defaults
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        ScopedHandle {
            store,
            concerns: Concerns::default(),
        }
    }

    pub fn concerns(&self) -> Concerns {
        self.concerns
    }

    /// Derive a handle with the given overrides; `None` inherits from `self`
    pub fn with_concern(
        &self,
        write: Option<WriteConcernLevel>,
        read: Option<ReadConcernLevel>,
    ) -> ScopedHandle {
        ScopedHandle {
            store: self.store.clone(),
            concerns: self.concerns.overlay(Concerns::new(write, read)),
        }
    }

    pub fn with_write_concern(&self, write: WriteConcernLevel) -> ScopedHandle {
        self.with_concern(Some(write), None)
    }

    pub fn with_read_concern(&self, read: ReadConcernLevel) -> ScopedHandle {
        self.with_concern(None, Some(read))
    }

    /// Insert and wait for the write concern, for at most `deadline`.
    ///
    /// Running out of time yields `StoreError::DeadlineElapsed`, which tells
    /// "the store was still waiting for quorum" apart from a store failure.
    pub async fn insert_many(
        &self,
        docs: &[Person],
        deadline: Duration,
    ) -> Result<InsertSummary, StoreError> {
        let start = Instant::now();
        debug!(docs = docs.len(), write = ?self.concerns.write, "insert_many");

        match tokio::time::timeout(deadline, self.store.insert_many(docs, &self.concerns)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::DeadlineElapsed {
                elapsed: start.elapsed(),
            }),
        }
    }

    pub async fn find(&self) -> Result<Vec<Person>, StoreError> {
        self.store.find(&self.concerns).await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.find().await?.len())
    }

    pub async fn clear(&self) -> Result<u64, StoreError> {
        self.store.clear().await
    }
}
