// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Abstractions over the authoritative remote.
//!
//! The remote is a generic authenticated CRUD API plus a change feed. Both
//! are traits so the sync engine and realtime manager can be driven by mock
//! implementations in tests.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use mnemo_core::{EntityRecord, Table};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Error type for remote operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The remote could not be reached. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The remote rejected the payload. Retrying will not help.
    #[error("validation error: {0}")]
    Validation(String),

    /// The session is missing or expired.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The record does not exist remotely.
    #[error("not found: {table}/{id}")]
    NotFound { table: String, id: String },
}

impl RemoteError {
    pub fn not_found(table: Table, id: &str) -> Self {
        RemoteError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        }
    }

    /// Whether the same request may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::Auth(_))
    }
}

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Boxed future returned by remote trait methods.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = RemoteResult<T>> + Send + 'a>>;

/// An equality filter on one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &str, value: &str) -> Self {
        Filter {
            column: column.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// CRUD access to the authoritative remote store.
pub trait RemoteStore: Send + Sync {
    /// Inserts a full record and returns the stored version.
    fn create<'a>(&'a self, record: &'a EntityRecord) -> RemoteFuture<'a, EntityRecord>;

    /// Changes some columns of a record and returns the stored version.
    fn update<'a>(
        &'a self,
        table: Table,
        id: &'a str,
        changes: &'a Map<String, Value>,
    ) -> RemoteFuture<'a, EntityRecord>;

    /// Deletes a record (soft on soft-deletable tables).
    fn delete<'a>(&'a self, table: Table, id: &'a str) -> RemoteFuture<'a, ()>;

    /// Reads one record, `None` if it does not exist.
    fn fetch<'a>(&'a self, table: Table, id: &'a str) -> RemoteFuture<'a, Option<EntityRecord>>;

    /// Reads every record matching a filter.
    fn query<'a>(&'a self, table: Table, filter: &'a Filter) -> RemoteFuture<'a, Vec<EntityRecord>>;
}

/// The kind of change carried by a push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// A change made to a remote record by any client.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub event_type: ChangeType,
    pub table: Table,
    /// The record after the change (inserts and updates).
    pub new: Option<EntityRecord>,
    /// The columns of the record before the change, at least its `id` (deletes).
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn insert(record: EntityRecord) -> Self {
        ChangeEvent {
            event_type: ChangeType::Insert,
            table: record.table(),
            new: Some(record),
            old: None,
        }
    }

    pub fn update(record: EntityRecord) -> Self {
        ChangeEvent {
            event_type: ChangeType::Update,
            table: record.table(),
            new: Some(record),
            old: None,
        }
    }

    pub fn delete(table: Table, id: &str) -> Self {
        ChangeEvent {
            event_type: ChangeType::Delete,
            table,
            new: None,
            old: Some(serde_json::json!({ "id": id })),
        }
    }

    /// Id of the changed record.
    pub fn record_id(&self) -> Option<&str> {
        if let Some(record) = &self.new {
            return Some(record.id());
        }
        self.old.as_ref().and_then(|old| old.get("id")).and_then(Value::as_str)
    }
}

/// Events delivered on a live channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Change(ChangeEvent),
    /// The channel failed and will not deliver further events.
    Error(RemoteError),
}

/// A named push channel over one table and filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub table: Table,
    pub filter: Filter,
}

impl ChannelSpec {
    /// Builds a channel whose name is derived from its table and filter.
    pub fn new(table: Table, filter: Filter) -> Self {
        ChannelSpec {
            name: format!("{table}:{filter}"),
            table,
            filter,
        }
    }
}

/// Push notifications of remote changes.
pub trait ChangeFeed: Send + Sync {
    /// Opens a channel, delivering its events to `sink` until unsubscribed.
    ///
    /// Resolves once the channel is established. Dropping `sink` signals the
    /// channel closed.
    fn subscribe<'a>(
        &'a self,
        channel: &'a ChannelSpec,
        sink: mpsc::UnboundedSender<ChannelEvent>,
    ) -> RemoteFuture<'a, ()>;

    /// Closes a channel by name. Unknown names are ignored.
    fn unsubscribe(&self, name: &str);
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
