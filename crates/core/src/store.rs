// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed local store.
//!
//! The [`LocalStore`] mirrors every remote table. Each row keeps the full
//! record as JSON next to the columns the sync layer queries directly
//! (`updated_at`, `sync_status`, `deleted_at`). A separate `kv` table backs
//! the [`KeyValueStore`] used by the offline queue and the persisted cache.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::entity::{EntityRecord, SyncStatus, Table};
use crate::error::{Error, Result};
use crate::kv::KeyValueStore;

/// SQL for the key-value table.
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// SQL for one entity table.
fn table_schema(table: Table) -> String {
    let name = table.as_str();
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {name} (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_{name}_sync_status ON {name}(sync_status);
"#
    )
}

/// Parse a string value from the database, returning a rusqlite error on parse failure.
fn parse_db<T: std::str::FromStr>(
    value: &str,
    column: &str,
) -> std::result::Result<T, rusqlite::Error> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!("invalid value '{value}' in column '{column}'"))),
        )
    })
}

/// Maps SQLite's "database or disk is full" into [`Error::QuotaExceeded`].
fn storage_error(err: rusqlite::Error) -> Error {
    let err = Error::from(err);
    if err.is_quota_exceeded() {
        Error::QuotaExceeded
    } else {
        err
    }
}

/// Persistent structured store for synced records.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Opens a store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(KV_SCHEMA)?;
        for table in Table::ALL {
            conn.execute_batch(&table_schema(table))?;
        }
        Ok(LocalStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Caps the database file at `pages` pages; writes beyond fail with a quota error.
    pub fn set_max_pages(&self, pages: u32) -> Result<()> {
        self.conn().query_row(&format!("PRAGMA max_page_count = {pages}"), [], |_| Ok(()))?;
        Ok(())
    }

    /// Inserts or replaces a record.
    pub fn put(&self, record: &EntityRecord) -> Result<()> {
        let table = record.table().as_str();
        let data = serde_json::to_string(&record.to_value()?)?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO {table} (id, data, updated_at, sync_status, deleted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                        data = excluded.data,
                        updated_at = excluded.updated_at,
                        sync_status = excluded.sync_status,
                        deleted_at = excluded.deleted_at"
                ),
                params![
                    record.id(),
                    data,
                    record.updated_at().to_rfc3339(),
                    record.sync_status().as_str(),
                    record.deleted_at().map(|d| d.to_rfc3339()),
                ],
            )
            .map_err(storage_error)?;
        Ok(())
    }

    /// Gets a record by id.
    pub fn get(&self, table: Table, id: &str) -> Result<Option<EntityRecord>> {
        let data: Option<String> = self
            .conn()
            .query_row(
                &format!("SELECT data FROM {} WHERE id = ?1", table.as_str()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        data.map(|d| EntityRecord::from_value(table, serde_json::from_str(&d)?)).transpose()
    }

    /// Gets a record by id, failing if it does not exist.
    pub fn require(&self, table: Table, id: &str) -> Result<EntityRecord> {
        self.get(table, id)?.ok_or_else(|| Error::RecordNotFound {
            table: table.to_string(),
            id: id.to_string(),
        })
    }

    /// Lists all records of a table, including soft-deleted ones, ordered by id.
    pub fn list(&self, table: Table) -> Result<Vec<EntityRecord>> {
        self.query_records(table, &format!("SELECT data FROM {} ORDER BY id", table.as_str()), [])
    }

    /// Lists records whose `column` equals `value`, excluding soft-deleted ones.
    pub fn find_by(&self, table: Table, column: &str, value: &str) -> Result<Vec<EntityRecord>> {
        if column != "id" && !table.columns().contains(&column) {
            return Err(Error::invalid_mutation(table, format!("unknown column '{column}'")));
        }
        let path = format!("$.{column}");
        self.query_records(
            table,
            &format!(
                "SELECT data FROM {} WHERE json_extract(data, ?1) = ?2 AND deleted_at IS NULL
                 ORDER BY id",
                table.as_str()
            ),
            params![path, value],
        )
    }

    fn query_records<P: rusqlite::Params>(
        &self,
        table: Table,
        sql: &str,
        params: P,
    ) -> Result<Vec<EntityRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for data in rows {
            records.push(EntityRecord::from_value(table, serde_json::from_str(&data?)?)?);
        }
        Ok(records)
    }

    /// Reads the sync status of a record without decoding it.
    pub fn sync_status(&self, table: Table, id: &str) -> Result<Option<SyncStatus>> {
        let status: Option<String> = self
            .conn()
            .query_row(
                &format!("SELECT sync_status FROM {} WHERE id = ?1", table.as_str()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        status.map(|s| parse_db(&s, "sync_status").map_err(Error::from)).transpose()
    }

    /// Sets the sync status of a record. Returns false if the record does not exist.
    pub fn set_sync_status(&self, table: Table, id: &str, status: SyncStatus) -> Result<bool> {
        let changed = self
            .conn()
            .execute(
                &format!(
                    "UPDATE {} SET sync_status = ?2, data = json_set(data, '$.sync_status', ?2)
                     WHERE id = ?1",
                    table.as_str()
                ),
                params![id, status.as_str()],
            )
            .map_err(storage_error)?;
        Ok(changed > 0)
    }

    /// Reads `updated_at` of a record without decoding it.
    pub fn updated_at(&self, table: Table, id: &str) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .conn()
            .query_row(
                &format!("SELECT updated_at FROM {} WHERE id = ?1", table.as_str()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        value.map(|v| parse_db(&v, "updated_at").map_err(Error::from)).transpose()
    }

    /// Permanently removes a record. Returns false if it did not exist.
    pub fn remove(&self, table: Table, id: &str) -> Result<bool> {
        let removed = self
            .conn()
            .execute(&format!("DELETE FROM {} WHERE id = ?1", table.as_str()), params![id])?;
        Ok(removed > 0)
    }
}

impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(storage_error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn().execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
