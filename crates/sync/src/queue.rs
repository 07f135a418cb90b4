// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Offline queue for persisting local mutations until the remote confirms them.
//!
//! The queue is stored as one ordered JSON array under [`QUEUE_KEY`] in a
//! [`KeyValueStore`]. Every mutating call rewrites the whole array before
//! returning, so a crash never loses an acknowledged enqueue. Operations
//! keep their creation order; there is no deduplication.

use std::sync::{Arc, Mutex, MutexGuard};

use mnemo_core::{
    ClockSource, EntityRecord, KeyValueStore, Mutation, OpId, OpIdGenerator, QueuedOperation,
    Table,
};

/// Storage key of the persisted queue.
pub const QUEUE_KEY: &str = "offline_queue";

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The mutation failed validation and was not queued.
    #[error("invalid mutation: {0}")]
    Invalid(#[source] mnemo_core::Error),

    /// Reading or writing the backing store failed.
    #[error("storage error: {0}")]
    Storage(#[from] mnemo_core::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Durable FIFO of [`QueuedOperation`]s.
pub struct OfflineQueue {
    kv: Arc<dyn KeyValueStore>,
    ids: OpIdGenerator<Arc<dyn ClockSource>>,
    /// In-memory copy of the persisted array.
    ops: Mutex<Vec<QueuedOperation>>,
}

impl OfflineQueue {
    /// Opens the queue, loading any operations persisted by a previous session.
    pub fn open(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn ClockSource>) -> QueueResult<Self> {
        let ops: Vec<QueuedOperation> = match kv.get(QUEUE_KEY)? {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };

        let ids = OpIdGenerator::with_clock(clock);
        if let Some(last) = ops.iter().map(|op| op.id).max() {
            ids.observe(last);
        }
        if !ops.is_empty() {
            tracing::info!(count = ops.len(), "loaded offline queue");
        }

        Ok(OfflineQueue {
            kv,
            ids,
            ops: Mutex::new(ops),
        })
    }

    fn ops(&self) -> MutexGuard<'_, Vec<QueuedOperation>> {
        self.ops.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persists `next` and, only if that succeeds, makes it the current state.
    fn commit(
        &self,
        current: &mut Vec<QueuedOperation>,
        next: Vec<QueuedOperation>,
    ) -> QueueResult<()> {
        let json = serde_json::to_string(&next)?;
        self.kv.set(QUEUE_KEY, &json)?;
        *current = next;
        Ok(())
    }

    /// Validates and appends a mutation. Returns the new operation's id.
    pub fn enqueue(&self, mutation: Mutation) -> QueueResult<OpId> {
        mutation.validate().map_err(QueueError::Invalid)?;

        let mut ops = self.ops();
        let op = QueuedOperation::new(self.ids.next_id(), mutation);
        let id = op.id;
        tracing::debug!(
            op_id = %id,
            op_type = %op.operation_type(),
            table = %op.table(),
            record_id = op.record_id(),
            "enqueued operation"
        );

        let mut next = ops.clone();
        next.push(op);
        self.commit(&mut ops, next)?;
        Ok(id)
    }

    /// All queued operations, oldest first.
    pub fn list(&self) -> Vec<QueuedOperation> {
        self.ops().clone()
    }

    /// The current version of a queued operation.
    pub fn get(&self, id: OpId) -> Option<QueuedOperation> {
        self.ops().iter().find(|op| op.id == id).cloned()
    }

    /// Id of the most recently queued operation.
    pub fn newest_id(&self) -> Option<OpId> {
        self.ops().last().map(|op| op.id)
    }

    /// Rebases the queued updates of `merged`'s record with ids in
    /// `after < id <= through` onto the merged record. Returns how many changed.
    pub fn rebase_updates(
        &self,
        merged: &EntityRecord,
        after: OpId,
        through: OpId,
    ) -> QueueResult<usize> {
        let mut ops = self.ops();
        let mut next = ops.clone();
        let mut rebased = 0;
        for op in next.iter_mut().filter(|op| op.id > after && op.id <= through) {
            if let Mutation::Update(update) = &mut op.mutation {
                if update.table == merged.table() && update.id == merged.id() {
                    update.rebase(merged)?;
                    rebased += 1;
                }
            }
        }
        if rebased > 0 {
            self.commit(&mut ops, next)?;
        }
        Ok(rebased)
    }

    /// Removes an operation. Returns false if it was not queued.
    pub fn remove(&self, id: OpId) -> QueueResult<bool> {
        let mut ops = self.ops();
        if !ops.iter().any(|op| op.id == id) {
            return Ok(false);
        }
        let next = ops.iter().filter(|op| op.id != id).cloned().collect();
        self.commit(&mut ops, next)?;
        Ok(true)
    }

    /// Records a failed attempt. Returns false if the operation was not queued.
    pub fn increment_retry(&self, id: OpId, error: &str) -> QueueResult<bool> {
        let mut ops = self.ops();
        let mut next = ops.clone();
        let Some(op) = next.iter_mut().find(|op| op.id == id) else {
            return Ok(false);
        };
        op.retry_count = op.retry_count.saturating_add(1);
        op.last_error = Some(error.to_string());
        self.commit(&mut ops, next)?;
        Ok(true)
    }

    pub fn has_pending(&self) -> bool {
        !self.ops().is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.ops().len()
    }

    /// Whether any queued operation references the given record.
    pub fn has_pending_for(&self, table: Table, id: &str) -> bool {
        self.ops().iter().any(|op| op.table() == table && op.record_id() == id)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
