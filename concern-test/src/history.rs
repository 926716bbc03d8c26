//! History types for recording store operations
//!
//! Every insert and read a scenario issues is recorded with its invocation
//! and completion time, so the checker can reason about which writes a read
//! could or must have observed.

use replset_harness::{ReadConcernLevel, WriteConcernLevel};
use serde::Serialize;
use tokio::time::Instant;

/// Microsecond timestamp relative to scenario start
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp from microseconds since scenario start
    pub fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    /// Microseconds since scenario start
    pub fn as_micros(&self) -> u64 {
        self.0
    }
}

/// What an operation did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// `insert_many` of `docs` documents; `None` is the store's default concern
    Insert {
        write: Option<WriteConcernLevel>,
        docs: usize,
    },
    /// Full collection read
    Read { read: Option<ReadConcernLevel> },
}

/// What an operation returned
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpResult {
    /// Insert acknowledged at its write concern
    Inserted(usize),
    /// Read returned this many documents
    Read(usize),
    /// Operation failed; for inserts the documents may or may not be applied
    Error(String),
}

/// A completed operation with timing interval
#[derive(Clone, Debug)]
pub struct Operation {
    pub id: u64,
    pub kind: OpKind,
    /// When the operation was issued
    pub invoke_ts: Timestamp,
    /// When the operation returned
    pub complete_ts: Timestamp,
    pub result: OpResult,
}

impl Operation {
    /// Create a completed operation
    pub fn new(
        id: u64,
        kind: OpKind,
        invoke_ts: Timestamp,
        complete_ts: Timestamp,
        result: OpResult,
    ) -> Self {
        Operation {
            id,
            kind,
            invoke_ts,
            complete_ts,
            result,
        }
    }

    /// Whether this is a read
    pub fn is_read(&self) -> bool {
        matches!(self.kind, OpKind::Read { .. })
    }

    /// Whether this is an insert
    pub fn is_insert(&self) -> bool {
        matches!(self.kind, OpKind::Insert { .. })
    }

    /// Documents returned by a successful read
    pub fn read_count(&self) -> Option<usize> {
        match (&self.kind, &self.result) {
            (OpKind::Read { .. }, OpResult::Read(n)) => Some(*n),
            _ => None,
        }
    }

    /// Documents submitted by an insert, acknowledged or not
    pub fn submitted_docs(&self) -> usize {
        match self.kind {
            OpKind::Insert { docs, .. } => docs,
            OpKind::Read { .. } => 0,
        }
    }

    /// Read issued at `readConcern: majority`
    pub fn is_majority_read(&self) -> bool {
        matches!(
            self.kind,
            OpKind::Read {
                read: Some(ReadConcernLevel::Majority)
            }
        )
    }

    /// Insert acknowledged at `w: majority`
    pub fn is_majority_acknowledged(&self) -> bool {
        matches!(
            (&self.kind, &self.result),
            (
                OpKind::Insert {
                    write: Some(WriteConcernLevel::Majority),
                    ..
                },
                OpResult::Inserted(_)
            )
        )
    }

    /// Check if this operation finished before `other` started
    pub fn precedes(&self, other: &Operation) -> bool {
        self.complete_ts <= other.invoke_ts
    }
}

/// Collection of operations from a scenario run
#[derive(Clone, Debug)]
pub struct History {
    ops: Vec<Operation>,
    start_time: Instant,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    /// Create an empty history; timestamps count from now
    pub fn new() -> Self {
        History {
            ops: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Current time relative to scenario start
    pub fn now(&self) -> Timestamp {
        Timestamp(self.start_time.elapsed().as_micros() as u64)
    }

    /// Record a completed operation
    pub fn add(&mut self, op: Operation) {
        self.ops.push(op);
    }

    /// Operations in recording order
    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    /// Number of recorded operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations ordered by invocation time
    pub fn sorted_by_invoke_time(&self) -> Vec<&Operation> {
        let mut sorted: Vec<_> = self.ops.iter().collect();
        sorted.sort_by_key(|op| op.invoke_ts);
        sorted
    }

    /// Operations that did not fail
    pub fn successful_ops(&self) -> Vec<&Operation> {
        self.ops
            .iter()
            .filter(|op| !matches!(op.result, OpResult::Error(_)))
            .collect()
    }

    /// Recorded inserts, successful or not
    pub fn inserts(&self) -> impl Iterator<Item = &Operation> {
        self.ops.iter().filter(|op| op.is_insert())
    }

    /// Recorded reads, successful or not
    pub fn reads(&self) -> impl Iterator<Item = &Operation> {
        self.ops.iter().filter(|op| op.is_read())
    }
}
