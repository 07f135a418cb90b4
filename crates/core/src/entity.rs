// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Synced entity types.
//!
//! Every entity mirrors a remote table and carries an `updated_at` timestamp
//! for last-write-wins comparisons plus a local-only [`SyncStatus`]. Topics,
//! subjects and learning items are soft-deletable: deletion sets
//! `deleted_at` so a concurrent update still has a record to merge into.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Whether the latest local version of a record has reached the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local changes are waiting in the mutation queue.
    #[default]
    Pending,
    /// No queued operation references this record.
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            _ => Err(Error::InvalidSyncStatus(s.to_string())),
        }
    }
}

/// Archive state of topics and learning items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    #[default]
    Active,
    Archived,
}

/// The remote tables mirrored by the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Topics,
    Subjects,
    LearningItems,
    ReviewSessions,
    GamificationStats,
    DailyStats,
    Users,
}

impl Table {
    /// Every synced table, in schema order.
    pub const ALL: [Table; 7] = [
        Table::Topics,
        Table::Subjects,
        Table::LearningItems,
        Table::ReviewSessions,
        Table::GamificationStats,
        Table::DailyStats,
        Table::Users,
    ];

    /// Returns the string representation used in storage, channel names and cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Topics => "topics",
            Table::Subjects => "subjects",
            Table::LearningItems => "learning_items",
            Table::ReviewSessions => "review_sessions",
            Table::GamificationStats => "gamification_stats",
            Table::DailyStats => "daily_stats",
            Table::Users => "users",
        }
    }

    /// Columns that an update may change.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Topics => &[
                "user_id",
                "subject_id",
                "name",
                "description",
                "color",
                "archive_status",
                "deleted_at",
                "created_at",
                "updated_at",
            ],
            Table::Subjects => {
                &["user_id", "name", "color", "deleted_at", "created_at", "updated_at"]
            }
            Table::LearningItems => &[
                "user_id",
                "topic_id",
                "content",
                "review_count",
                "last_reviewed_at",
                "next_review_at",
                "ease_factor",
                "interval_days",
                "archive_status",
                "deleted_at",
                "created_at",
                "updated_at",
            ],
            Table::ReviewSessions => &[
                "user_id",
                "learning_item_id",
                "quality",
                "points_earned",
                "perfect_timing",
                "reviewed_at",
                "updated_at",
            ],
            Table::GamificationStats => &[
                "user_id",
                "total_points",
                "current_level",
                "current_streak",
                "longest_streak",
                "last_review_date",
                "updated_at",
            ],
            Table::DailyStats => &[
                "user_id",
                "date",
                "points_earned",
                "reviews_completed",
                "perfect_timing_count",
                "items_mastered",
                "updated_at",
            ],
            Table::Users => &["email", "display_name", "created_at", "updated_at"],
        }
    }

    /// Whether deletes on this table are soft (`deleted_at`).
    pub fn is_soft_deletable(&self) -> bool {
        matches!(self, Table::Topics | Table::Subjects | Table::LearningItems)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Table::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownTable(s.to_string()))
    }
}

/// A study topic, optionally grouped under a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub subject_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub archive_status: ArchiveStatus,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl Topic {
    pub fn new(id: &str, user_id: &str, name: &str, now: DateTime<Utc>) -> Self {
        Topic {
            id: id.to_string(),
            user_id: user_id.to_string(),
            subject_id: None,
            name: name.to_string(),
            description: None,
            color: None,
            archive_status: ArchiveStatus::Active,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }
}

/// A subject grouping several topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl Subject {
    pub fn new(id: &str, user_id: &str, name: &str, now: DateTime<Utc>) -> Self {
        Subject {
            id: id.to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            color: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }
}

/// A reviewable item inside a topic.
///
/// `ease_factor`, `interval_days` and `next_review_at` are produced by the
/// spaced-repetition scheduler and are opaque to the sync layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningItem {
    pub id: String,
    pub user_id: String,
    pub topic_id: String,
    pub content: String,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default)]
    pub last_reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_review_at: Option<DateTime<Utc>>,
    pub ease_factor: f64,
    #[serde(default)]
    pub interval_days: u32,
    #[serde(default)]
    pub archive_status: ArchiveStatus,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl LearningItem {
    /// Default ease factor for a never-reviewed item.
    pub const INITIAL_EASE: f64 = 2.5;

    pub fn new(id: &str, user_id: &str, topic_id: &str, content: &str, now: DateTime<Utc>) -> Self {
        LearningItem {
            id: id.to_string(),
            user_id: user_id.to_string(),
            topic_id: topic_id.to_string(),
            content: content.to_string(),
            review_count: 0,
            last_reviewed_at: None,
            next_review_at: None,
            ease_factor: Self::INITIAL_EASE,
            interval_days: 0,
            archive_status: ArchiveStatus::Active,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }
}

/// One completed review of a learning item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSession {
    pub id: String,
    pub user_id: String,
    pub learning_item_id: String,
    pub quality: u8,
    #[serde(default)]
    pub points_earned: u64,
    #[serde(default)]
    pub perfect_timing: bool,
    pub reviewed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

/// Per-user gamification counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamificationStats {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub total_points: u64,
    #[serde(default)]
    pub current_level: u32,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    #[serde(default)]
    pub last_review_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

/// Per-user, per-calendar-day activity counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub points_earned: u64,
    #[serde(default)]
    pub reviews_completed: u32,
    #[serde(default)]
    pub perfect_timing_count: u32,
    #[serde(default)]
    pub items_mastered: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

/// Account profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

/// Common access to the bookkeeping fields of every entity.
pub trait Record: Clone + Serialize + DeserializeOwned {
    /// The table this entity lives in.
    const TABLE: Table;

    fn id(&self) -> &str;
    fn updated_at(&self) -> DateTime<Utc>;
    fn sync_status(&self) -> SyncStatus;
    fn set_sync_status(&mut self, status: SyncStatus);

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

macro_rules! impl_record {
    (@base $ty:ty, $table:expr, { $($extra:tt)* }) => {
        impl Record for $ty {
            const TABLE: Table = $table;

            fn id(&self) -> &str {
                &self.id
            }

            fn updated_at(&self) -> DateTime<Utc> {
                self.updated_at
            }

            fn sync_status(&self) -> SyncStatus {
                self.sync_status
            }

            fn set_sync_status(&mut self, status: SyncStatus) {
                self.sync_status = status;
            }

            $($extra)*
        }
    };
    ($ty:ty, $table:expr, soft_delete) => {
        impl_record!(@base $ty, $table, {
            fn deleted_at(&self) -> Option<DateTime<Utc>> {
                self.deleted_at
            }
        });
    };
    ($ty:ty, $table:expr) => {
        impl_record!(@base $ty, $table, {});
    };
}

impl_record!(Topic, Table::Topics, soft_delete);
impl_record!(Subject, Table::Subjects, soft_delete);
impl_record!(LearningItem, Table::LearningItems, soft_delete);
impl_record!(ReviewSession, Table::ReviewSessions);
impl_record!(GamificationStats, Table::GamificationStats);
impl_record!(DailyStats, Table::DailyStats);
impl_record!(User, Table::Users);

/// Any synced record, tagged by its table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record")]
pub enum EntityRecord {
    #[serde(rename = "topics")]
    Topic(Topic),
    #[serde(rename = "subjects")]
    Subject(Subject),
    #[serde(rename = "learning_items")]
    LearningItem(LearningItem),
    #[serde(rename = "review_sessions")]
    ReviewSession(ReviewSession),
    #[serde(rename = "gamification_stats")]
    GamificationStats(GamificationStats),
    #[serde(rename = "daily_stats")]
    DailyStats(DailyStats),
    #[serde(rename = "users")]
    User(User),
}

/// Runs the same expression against whichever entity an [`EntityRecord`] holds.
macro_rules! with_record {
    ($value:expr, $r:ident => $body:expr) => {
        match $value {
            EntityRecord::Topic($r) => $body,
            EntityRecord::Subject($r) => $body,
            EntityRecord::LearningItem($r) => $body,
            EntityRecord::ReviewSession($r) => $body,
            EntityRecord::GamificationStats($r) => $body,
            EntityRecord::DailyStats($r) => $body,
            EntityRecord::User($r) => $body,
        }
    };
}

impl EntityRecord {
    pub fn table(&self) -> Table {
        match self {
            EntityRecord::Topic(_) => Table::Topics,
            EntityRecord::Subject(_) => Table::Subjects,
            EntityRecord::LearningItem(_) => Table::LearningItems,
            EntityRecord::ReviewSession(_) => Table::ReviewSessions,
            EntityRecord::GamificationStats(_) => Table::GamificationStats,
            EntityRecord::DailyStats(_) => Table::DailyStats,
            EntityRecord::User(_) => Table::Users,
        }
    }

    pub fn id(&self) -> &str {
        with_record!(self, r => r.id())
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        with_record!(self, r => r.updated_at())
    }

    pub fn sync_status(&self) -> SyncStatus {
        with_record!(self, r => r.sync_status())
    }

    pub fn set_sync_status(&mut self, status: SyncStatus) {
        with_record!(self, r => r.set_sync_status(status))
    }

    /// Returns a copy with the given sync status.
    pub fn with_sync_status(mut self, status: SyncStatus) -> Self {
        self.set_sync_status(status);
        self
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        with_record!(self, r => r.deleted_at())
    }

    /// Serializes the inner entity (without the table tag).
    pub fn to_value(&self) -> Result<Value> {
        Ok(with_record!(self, r => serde_json::to_value(r)?))
    }

    /// Deserializes an untagged entity for the given table.
    pub fn from_value(table: Table, value: Value) -> Result<Self> {
        let record = match table {
            Table::Topics => EntityRecord::Topic(serde_json::from_value(value)?),
            Table::Subjects => EntityRecord::Subject(serde_json::from_value(value)?),
            Table::LearningItems => EntityRecord::LearningItem(serde_json::from_value(value)?),
            Table::ReviewSessions => EntityRecord::ReviewSession(serde_json::from_value(value)?),
            Table::GamificationStats => {
                EntityRecord::GamificationStats(serde_json::from_value(value)?)
            }
            Table::DailyStats => EntityRecord::DailyStats(serde_json::from_value(value)?),
            Table::Users => EntityRecord::User(serde_json::from_value(value)?),
        };
        Ok(record)
    }

    /// Returns a copy with the given column changes applied.
    ///
    /// The result is re-validated against the entity's shape, so a change
    /// with the wrong value type fails instead of corrupting the record.
    pub fn apply_changes(&self, changes: &Map<String, Value>) -> Result<Self> {
        let table = self.table();
        let mut value = self.to_value()?;
        let fields = value
            .as_object_mut()
            .ok_or_else(|| Error::CorruptedData(format!("{table} record is not an object")))?;
        for (column, new_value) in changes {
            fields.insert(column.clone(), new_value.clone());
        }
        Self::from_value(table, value)
            .map_err(|e| Error::invalid_mutation(table, format!("changes do not fit record: {e}")))
    }

    /// Sets `deleted_at` on soft-deletable records; other records are returned unchanged.
    pub fn soft_deleted(mut self, at: DateTime<Utc>) -> Self {
        match &mut self {
            EntityRecord::Topic(t) => {
                t.deleted_at = Some(at);
                t.updated_at = at;
            }
            EntityRecord::Subject(s) => {
                s.deleted_at = Some(at);
                s.updated_at = at;
            }
            EntityRecord::LearningItem(i) => {
                i.deleted_at = Some(at);
                i.updated_at = at;
            }
            _ => {}
        }
        self
    }
}

macro_rules! impl_from_entity {
    ($($ty:ident),*) => {
        $(
            impl From<$ty> for EntityRecord {
                fn from(record: $ty) -> Self {
                    EntityRecord::$ty(record)
                }
            }
        )*
    };
}

impl_from_entity!(Topic, Subject, LearningItem, ReviewSession, GamificationStats, DailyStats, User);

#[cfg(test)]
#[path = "entity_tests.rs"]
mod tests;
