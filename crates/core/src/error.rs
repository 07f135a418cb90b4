// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for mnemo-core operations.

use thiserror::Error;

/// All possible errors that can occur in mnemo-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("record not found: {table}/{id}")]
    RecordNotFound { table: String, id: String },

    #[error("unknown table: '{0}'\n  hint: valid tables are: topics, subjects, learning_items, review_sessions, gamification_stats, daily_stats, users")]
    UnknownTable(String),

    #[error("invalid sync status: '{0}'\n  hint: valid statuses are: pending, synced")]
    InvalidSyncStatus(String),

    #[error("invalid operation type: '{0}'\n  hint: valid types are: create, update, delete")]
    InvalidOperationType(String),

    #[error("invalid operation id: {0}")]
    InvalidOpId(String),

    #[error("invalid mutation for {table}: {reason}")]
    InvalidMutation { table: String, reason: String },

    #[error("cannot merge {local} with {remote}")]
    MismatchedRecords { local: String, remote: String },

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

impl Error {
    /// Builds an [`Error::InvalidMutation`] for the given table.
    pub fn invalid_mutation(table: impl ToString, reason: impl Into<String>) -> Self {
        Error::InvalidMutation {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error means the backing storage ran out of space.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            Error::QuotaExceeded => true,
            Error::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::DiskFull
            }
            _ => false,
        }
    }
}

/// A specialized Result type for mnemo-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
