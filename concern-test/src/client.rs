//! Recording store client
//!
//! Wraps a [`ScopedHandle`] so every insert and read is recorded to a shared
//! [`History`] with its invocation and completion timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use replset_harness::{
    InsertSummary, Person, ReadConcernLevel, ScopedHandle, StoreError, WriteConcernLevel,
};

use crate::history::{History, OpKind, OpResult, Operation, Timestamp};

/// Store handle that records its operations
#[derive(Clone)]
pub struct RecordingHandle {
    handle: ScopedHandle,
    history: Arc<Mutex<History>>,
    next_op_id: Arc<AtomicU64>,
}

impl RecordingHandle {
    pub fn new(handle: ScopedHandle, history: Arc<Mutex<History>>, op_counter: Arc<AtomicU64>) -> Self {
        RecordingHandle {
            handle,
            history,
            next_op_id: op_counter,
        }
    }

    /// Scope the underlying handle; the scoped copy records to the same history
    pub fn with_concern(
        &self,
        write: Option<WriteConcernLevel>,
        read: Option<ReadConcernLevel>,
    ) -> RecordingHandle {
        RecordingHandle {
            handle: self.handle.with_concern(write, read),
            history: self.history.clone(),
            next_op_id: self.next_op_id.clone(),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_op_id.fetch_add(1, Ordering::SeqCst)
    }

    fn now(&self) -> Timestamp {
        self.history.lock().now()
    }

    fn record(&self, op: Operation) {
        self.history.lock().add(op);
    }

    /// Insert with a bounded wait for the write concern
    pub async fn insert_many(
        &self,
        docs: &[Person],
        deadline: Duration,
    ) -> Result<InsertSummary, StoreError> {
        let op_id = self.next_id();
        let invoke_ts = self.now();

        let result = self.handle.insert_many(docs, deadline).await;

        let complete_ts = self.now();
        let op_result = match &result {
            Ok(summary) => OpResult::Inserted(summary.inserted),
            Err(e) => OpResult::Error(e.to_string()),
        };
        self.record(Operation::new(
            op_id,
            OpKind::Insert {
                write: self.handle.concerns().write,
                docs: docs.len(),
            },
            invoke_ts,
            complete_ts,
            op_result,
        ));

        result
    }

    /// Count every document visible at this handle's read concern
    pub async fn count(&self) -> Result<usize, StoreError> {
        let op_id = self.next_id();
        let invoke_ts = self.now();

        let result = self.handle.count().await;

        let complete_ts = self.now();
        let op_result = match &result {
            Ok(n) => OpResult::Read(*n),
            Err(e) => OpResult::Error(e.to_string()),
        };
        self.record(Operation::new(
            op_id,
            OpKind::Read {
                read: self.handle.concerns().read,
            },
            invoke_ts,
            complete_ts,
            op_result,
        ));

        result
    }

    pub fn history(&self) -> History {
        self.history.lock().clone()
    }
}
