// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The local write path.
//!
//! Every write lands in the local store first, marked pending, and then
//! enqueues exactly one operation for the sync engine. Cached reads of the
//! affected table are invalidated.
//!
//! If the enqueue fails the local write is undone, so a pending record
//! always has a queued operation behind it.

use std::sync::Arc;

use mnemo_core::{ClockSource, EntityRecord, LocalStore, Mutation, OpId, SyncStatus, Table};
use serde_json::{Map, Value};

use crate::cache::Cache;
use crate::error::Result;
use crate::queue::{OfflineQueue, QueueError};

/// Applies local writes and queues them for sync.
pub struct LocalWriter {
    store: Arc<LocalStore>,
    queue: Arc<OfflineQueue>,
    cache: Arc<Cache>,
    clock: Arc<dyn ClockSource>,
}

impl LocalWriter {
    pub fn new(
        store: Arc<LocalStore>,
        queue: Arc<OfflineQueue>,
        cache: Arc<Cache>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        LocalWriter {
            store,
            queue,
            cache,
            clock,
        }
    }

    /// Inserts a new record.
    pub fn create(&self, record: impl Into<EntityRecord>) -> Result<OpId> {
        let record = record.into().with_sync_status(SyncStatus::Pending);
        let mutation = Mutation::create(record.clone());
        mutation.validate().map_err(QueueError::Invalid)?;

        let previous = self.store.get(record.table(), record.id())?;
        self.store.put(&record)?;
        self.commit(record.table(), record.id(), previous.as_ref(), mutation)
    }

    /// Changes some columns of an existing record.
    ///
    /// `updated_at` is stamped with the current time unless `changes` sets it.
    pub fn update(
        &self,
        table: Table,
        id: &str,
        mut changes: Map<String, Value>,
    ) -> Result<OpId> {
        let local = self.store.require(table, id)?;
        if !changes.contains_key("updated_at") {
            let now =
                serde_json::to_value(self.clock.now_utc()).map_err(mnemo_core::Error::from)?;
            changes.insert("updated_at".to_string(), now);
        }

        let mutation = Mutation::update(table, id, changes.clone()).based_on(local.updated_at());
        mutation.validate().map_err(QueueError::Invalid)?;
        let updated = local.apply_changes(&changes)?.with_sync_status(SyncStatus::Pending);

        self.store.put(&updated)?;
        self.commit(table, id, Some(&local), mutation)
    }

    /// Deletes a record; soft-deletable records keep a row with `deleted_at` set.
    pub fn delete(&self, table: Table, id: &str) -> Result<OpId> {
        let local = self.store.require(table, id)?;
        if table.is_soft_deletable() {
            let deleted =
                local.clone().soft_deleted(self.clock.now_utc()).with_sync_status(SyncStatus::Pending);
            self.store.put(&deleted)?;
        } else {
            self.store.remove(table, id)?;
        }
        self.commit(table, id, Some(&local), Mutation::delete(table, id))
    }

    /// Enqueues the mutation, restoring `previous` in the store if that fails.
    fn commit(
        &self,
        table: Table,
        id: &str,
        previous: Option<&EntityRecord>,
        mutation: Mutation,
    ) -> Result<OpId> {
        let op_id = match self.queue.enqueue(mutation) {
            Ok(op_id) => op_id,
            Err(e) => {
                let restored = match previous {
                    Some(record) => self.store.put(record),
                    None => self.store.remove(table, id).map(|_| ()),
                };
                if let Err(restore) = restored {
                    tracing::warn!(%table, id, error = %restore, "undoing local write failed");
                }
                return Err(e.into());
            }
        };
        self.cache.invalidate_table(table);
        Ok(op_id)
    }
}

#[cfg(test)]
#[path = "writer_tests.rs"]
mod tests;
