// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Local mutations waiting to be applied remotely.
//!
//! Every local write produces one [`Mutation`]. Mutations are typed per
//! table and validated when they are created, so a malformed payload is
//! rejected at the write site instead of failing later during sync.
//!
//! A [`QueuedOperation`] wraps a mutation with its queue bookkeeping and is
//! persisted in the layout
//! `{id, type, table, data, timestamp, retryCount, lastError?, baseUpdatedAt?}`
//! where `data` is the full record for creates, `{id, ...changes}` for
//! updates and `{id}` for deletes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::clock::OpId;
use crate::entity::{EntityRecord, Table};
use crate::error::{Error, Result};

/// The kind of write an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            _ => Err(Error::InvalidOperationType(s.to_string())),
        }
    }
}

/// A partial update of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub table: Table,
    pub id: String,
    /// Column name to new value.
    pub changes: Map<String, Value>,
    /// The local `updated_at` the change was based on, for conflict detection.
    pub base_updated_at: Option<DateTime<Utc>>,
}

impl RecordUpdate {
    /// Points the update at a merged version of its record.
    ///
    /// The base becomes the merged `updated_at` and every changed column
    /// takes its merged value, so applying the update after the merge was
    /// pushed does not merge the same divergence a second time.
    pub fn rebase(&mut self, merged: &EntityRecord) -> Result<()> {
        if merged.table() != self.table || merged.id() != self.id {
            return Err(Error::MismatchedRecords {
                local: format!("{}/{}", self.table, self.id),
                remote: format!("{}/{}", merged.table(), merged.id()),
            });
        }
        let Value::Object(fields) = merged.to_value()? else {
            return Err(Error::invalid_mutation(self.table, "merged record must be an object"));
        };

        for (column, value) in self.changes.iter_mut() {
            if let Some(merged_value) = fields.get(column) {
                *value = merged_value.clone();
            }
        }
        self.base_updated_at = Some(merged.updated_at());
        Ok(())
    }
}

/// A typed local write.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert a full record.
    Create(EntityRecord),
    /// Change some columns of an existing record.
    Update(RecordUpdate),
    /// Delete a record (soft on soft-deletable tables).
    Delete { table: Table, id: String },
}

impl Mutation {
    pub fn create(record: impl Into<EntityRecord>) -> Self {
        Mutation::Create(record.into())
    }

    pub fn update(table: Table, id: &str, changes: Map<String, Value>) -> Self {
        Mutation::Update(RecordUpdate {
            table,
            id: id.to_string(),
            changes,
            base_updated_at: None,
        })
    }

    pub fn delete(table: Table, id: &str) -> Self {
        Mutation::Delete {
            table,
            id: id.to_string(),
        }
    }

    /// Records the `updated_at` an update was based on. No-op for other mutations.
    pub fn based_on(mut self, base: DateTime<Utc>) -> Self {
        if let Mutation::Update(update) = &mut self {
            update.base_updated_at = Some(base);
        }
        self
    }

    pub fn operation_type(&self) -> OperationType {
        match self {
            Mutation::Create(_) => OperationType::Create,
            Mutation::Update(_) => OperationType::Update,
            Mutation::Delete { .. } => OperationType::Delete,
        }
    }

    pub fn table(&self) -> Table {
        match self {
            Mutation::Create(record) => record.table(),
            Mutation::Update(update) => update.table,
            Mutation::Delete { table, .. } => *table,
        }
    }

    /// Returns the id of the record this mutation touches.
    pub fn record_id(&self) -> &str {
        match self {
            Mutation::Create(record) => record.id(),
            Mutation::Update(update) => &update.id,
            Mutation::Delete { id, .. } => id,
        }
    }

    fn base_updated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Mutation::Update(update) => update.base_updated_at,
            _ => None,
        }
    }

    /// Checks the payload against the table's shape.
    pub fn validate(&self) -> Result<()> {
        let table = self.table();
        if self.record_id().trim().is_empty() {
            return Err(Error::invalid_mutation(table, "record id must not be empty"));
        }

        if let Mutation::Update(update) = self {
            if update.changes.is_empty() {
                return Err(Error::invalid_mutation(table, "update has no changes"));
            }
            for (column, value) in &update.changes {
                if column == "id" {
                    if value.as_str() != Some(update.id.as_str()) {
                        return Err(Error::invalid_mutation(table, "update cannot change id"));
                    }
                    continue;
                }
                if !table.columns().contains(&column.as_str()) {
                    return Err(Error::invalid_mutation(
                        table,
                        format!("unknown column '{column}'"),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Builds the persisted `data` payload.
    pub fn data(&self) -> Result<Value> {
        match self {
            Mutation::Create(record) => record.to_value(),
            Mutation::Update(update) => {
                let mut data = update.changes.clone();
                data.insert("id".to_string(), Value::String(update.id.clone()));
                Ok(Value::Object(data))
            }
            Mutation::Delete { id, .. } => {
                let mut data = Map::new();
                data.insert("id".to_string(), Value::String(id.clone()));
                Ok(Value::Object(data))
            }
        }
    }

    /// Rebuilds a mutation from its persisted parts.
    pub fn from_parts(
        op_type: OperationType,
        table: Table,
        data: Value,
        base_updated_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let mutation = match op_type {
            OperationType::Create => Mutation::Create(EntityRecord::from_value(table, data)?),
            OperationType::Update => {
                let Value::Object(mut changes) = data else {
                    return Err(Error::invalid_mutation(table, "update data must be an object"));
                };
                let id = take_id(table, &mut changes)?;
                Mutation::Update(RecordUpdate {
                    table,
                    id,
                    changes,
                    base_updated_at,
                })
            }
            OperationType::Delete => {
                let Value::Object(mut fields) = data else {
                    return Err(Error::invalid_mutation(table, "delete data must be an object"));
                };
                Mutation::Delete {
                    table,
                    id: take_id(table, &mut fields)?,
                }
            }
        };
        mutation.validate()?;
        Ok(mutation)
    }
}

fn take_id(table: Table, fields: &mut Map<String, Value>) -> Result<String> {
    match fields.remove("id") {
        Some(Value::String(id)) => Ok(id),
        _ => Err(Error::invalid_mutation(table, "data is missing a string id")),
    }
}

/// A mutation waiting in the offline queue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireOperation")]
pub struct QueuedOperation {
    /// Time-ordered identifier.
    pub id: OpId,
    pub mutation: Mutation,
    /// Creation time in milliseconds since Unix epoch.
    pub timestamp: u64,
    /// Number of failed remote apply attempts.
    pub retry_count: u32,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Creates a fresh operation; its timestamp is the id's wall time.
    pub fn new(id: OpId, mutation: Mutation) -> Self {
        QueuedOperation {
            id,
            mutation,
            timestamp: id.wall_ms,
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn operation_type(&self) -> OperationType {
        self.mutation.operation_type()
    }

    pub fn table(&self) -> Table {
        self.mutation.table()
    }

    pub fn record_id(&self) -> &str {
        self.mutation.record_id()
    }

    /// Milliseconds elapsed since the operation was created.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp)
    }

    /// Whether the operation is older than the given threshold.
    pub fn is_older_than(&self, now_ms: u64, threshold_ms: u64) -> bool {
        self.age_ms(now_ms) > threshold_ms
    }
}

/// Persisted form of a [`QueuedOperation`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOperation {
    id: OpId,
    #[serde(rename = "type")]
    op_type: OperationType,
    table: Table,
    data: Value,
    timestamp: u64,
    #[serde(default)]
    retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<WireOperation> for QueuedOperation {
    type Error = Error;

    fn try_from(wire: WireOperation) -> Result<Self> {
        let mutation =
            Mutation::from_parts(wire.op_type, wire.table, wire.data, wire.base_updated_at)?;
        Ok(QueuedOperation {
            id: wire.id,
            mutation,
            timestamp: wire.timestamp,
            retry_count: wire.retry_count,
            last_error: wire.last_error,
        })
    }
}

impl Serialize for QueuedOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let data = self.mutation.data().map_err(serde::ser::Error::custom)?;
        WireOperation {
            id: self.id,
            op_type: self.operation_type(),
            table: self.table(),
            data,
            timestamp: self.timestamp,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
            base_updated_at: self.mutation.base_updated_at(),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
#[path = "mutation_tests.rs"]
mod tests;
