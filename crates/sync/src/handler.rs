// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-table application of queued operations to the remote.
//!
//! The sync engine looks up a [`TableHandler`] by table instead of switching
//! on table names. [`RemoteTableHandler`] is the default for every table: it
//! detects write conflicts on update and resolves them with the entity's
//! merge policy.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use mnemo_core::{
    resolve, ClockSource, EntityRecord, Mutation, QueuedOperation, RecordUpdate, Table,
};
use serde_json::{Map, Value};

use crate::remote::{RemoteError, RemoteResult, RemoteStore};

/// What a successful apply did.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The operation was applied as queued.
    Applied,
    /// The remote had diverged; this merged record was pushed instead and
    /// should replace the local copy.
    Merged(EntityRecord),
}

/// Boxed future returned by handler methods.
pub type ApplyFuture<'a> = Pin<Box<dyn Future<Output = RemoteResult<ApplyOutcome>> + Send + 'a>>;

/// Applies queued operations of one table to the remote.
pub trait TableHandler: Send + Sync {
    fn apply_create<'a>(&'a self, record: &'a EntityRecord) -> ApplyFuture<'a>;

    /// `local` is the current local version of the record, if any.
    fn apply_update<'a>(
        &'a self,
        update: &'a RecordUpdate,
        local: Option<&'a EntityRecord>,
    ) -> ApplyFuture<'a>;

    fn apply_delete<'a>(&'a self, table: Table, id: &'a str) -> ApplyFuture<'a>;
}

/// Default handler: plain remote CRUD plus conflict resolution on update.
pub struct RemoteTableHandler {
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn ClockSource>,
}

impl RemoteTableHandler {
    pub fn new(remote: Arc<dyn RemoteStore>, clock: Arc<dyn ClockSource>) -> Self {
        RemoteTableHandler { remote, clock }
    }
}

/// Columns of a record as an update payload.
fn record_changes(record: &EntityRecord) -> RemoteResult<Map<String, Value>> {
    let value = record.to_value().map_err(|e| RemoteError::Validation(e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(RemoteError::Validation(format!("{} record is not an object", record.table())));
    };
    fields.remove("id");
    fields.remove("sync_status");
    Ok(fields)
}

impl TableHandler for RemoteTableHandler {
    fn apply_create<'a>(&'a self, record: &'a EntityRecord) -> ApplyFuture<'a> {
        Box::pin(async move {
            self.remote.create(record).await?;
            Ok(ApplyOutcome::Applied)
        })
    }

    fn apply_update<'a>(
        &'a self,
        update: &'a RecordUpdate,
        local: Option<&'a EntityRecord>,
    ) -> ApplyFuture<'a> {
        Box::pin(async move {
            let (Some(base), Some(local)) = (update.base_updated_at, local) else {
                self.remote.update(update.table, &update.id, &update.changes).await?;
                return Ok(ApplyOutcome::Applied);
            };

            let remote = self.remote.fetch(update.table, &update.id).await?;
            match remote {
                Some(remote) if remote.updated_at() != base => {
                    let merged = resolve(local, &remote, self.clock.now_utc())
                        .map_err(|e| RemoteError::Validation(e.to_string()))?;
                    tracing::debug!(
                        table = %update.table,
                        id = %update.id,
                        base = %base,
                        remote_updated_at = %remote.updated_at(),
                        "resolved write conflict"
                    );
                    let changes = record_changes(&merged)?;
                    self.remote.update(update.table, &update.id, &changes).await?;
                    Ok(ApplyOutcome::Merged(merged))
                }
                _ => {
                    self.remote.update(update.table, &update.id, &update.changes).await?;
                    Ok(ApplyOutcome::Applied)
                }
            }
        })
    }

    fn apply_delete<'a>(&'a self, table: Table, id: &'a str) -> ApplyFuture<'a> {
        Box::pin(async move {
            match self.remote.delete(table, id).await {
                Ok(()) => Ok(ApplyOutcome::Applied),
                // Already gone
                Err(RemoteError::NotFound { .. }) => Ok(ApplyOutcome::Applied),
                Err(e) => Err(e),
            }
        })
    }
}

/// Table handlers keyed by table.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<Table, Arc<dyn TableHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with [`RemoteTableHandler`] for every table.
    pub fn with_remote(remote: Arc<dyn RemoteStore>, clock: Arc<dyn ClockSource>) -> Self {
        let handler: Arc<dyn TableHandler> = Arc::new(RemoteTableHandler::new(remote, clock));
        let mut registry = Self::new();
        for table in Table::ALL {
            registry.register(table, Arc::clone(&handler));
        }
        registry
    }

    /// Sets the handler for a table, replacing any previous one.
    pub fn register(&mut self, table: Table, handler: Arc<dyn TableHandler>) {
        self.handlers.insert(table, handler);
    }

    pub fn get(&self, table: Table) -> Option<&Arc<dyn TableHandler>> {
        self.handlers.get(&table)
    }

    /// Applies one queued operation through its table's handler.
    pub async fn apply(
        &self,
        op: &QueuedOperation,
        local: Option<&EntityRecord>,
    ) -> RemoteResult<ApplyOutcome> {
        let handler = self.get(op.table()).ok_or_else(|| {
            RemoteError::Validation(format!("no handler for table {}", op.table()))
        })?;
        match &op.mutation {
            Mutation::Create(record) => handler.apply_create(record).await,
            Mutation::Update(update) => handler.apply_update(update, local).await,
            Mutation::Delete { table, id } => handler.apply_delete(*table, id).await,
        }
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
