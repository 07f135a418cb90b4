// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use super::*;
use chrono::TimeZone;
use serde_json::json;
use yare::parameterized;

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

#[parameterized(
    topics = { Table::Topics, "topics" },
    subjects = { Table::Subjects, "subjects" },
    learning_items = { Table::LearningItems, "learning_items" },
    review_sessions = { Table::ReviewSessions, "review_sessions" },
    gamification_stats = { Table::GamificationStats, "gamification_stats" },
    daily_stats = { Table::DailyStats, "daily_stats" },
    users = { Table::Users, "users" },
)]
fn table_string_roundtrip(table: Table, name: &str) {
    assert_eq!(table.as_str(), name);
    assert_eq!(name.parse::<Table>().unwrap(), table);
    assert_eq!(serde_json::to_value(table).unwrap(), json!(name));
}

#[test]
fn unknown_table_is_rejected() {
    assert!(matches!("widgets".parse::<Table>(), Err(Error::UnknownTable(_))));
}

#[test]
fn sync_status_parse() {
    assert_eq!("pending".parse::<SyncStatus>().unwrap(), SyncStatus::Pending);
    assert_eq!("synced".parse::<SyncStatus>().unwrap(), SyncStatus::Synced);
    assert!("dirty".parse::<SyncStatus>().is_err());
}

#[test]
fn soft_deletable_tables() {
    assert!(Table::Topics.is_soft_deletable());
    assert!(Table::LearningItems.is_soft_deletable());
    assert!(!Table::DailyStats.is_soft_deletable());
}

#[test]
fn entity_record_accessors() {
    let record = EntityRecord::from(Topic::new("t-1", "u-1", "Rust", at(2)));
    assert_eq!(record.table(), Table::Topics);
    assert_eq!(record.id(), "t-1");
    assert_eq!(record.updated_at(), at(2));
    assert_eq!(record.sync_status(), SyncStatus::Pending);
    assert_eq!(record.deleted_at(), None);

    let synced = record.with_sync_status(SyncStatus::Synced);
    assert_eq!(synced.sync_status(), SyncStatus::Synced);
}

#[test]
fn entity_record_is_tagged_by_table() {
    let record = EntityRecord::from(Subject::new("s-1", "u-1", "Languages", at(1)));
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["table"], json!("subjects"));
    assert_eq!(value["record"]["name"], json!("Languages"));

    let back: EntityRecord = serde_json::from_value(value).unwrap();
    assert_eq!(back, record);
}

#[test]
fn from_value_fills_defaults() {
    let value = json!({
        "id": "i-1",
        "user_id": "u-1",
        "topic_id": "t-1",
        "content": "ownership",
        "ease_factor": 2.5,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    });
    let record = EntityRecord::from_value(Table::LearningItems, value).unwrap();
    let EntityRecord::LearningItem(item) = record else {
        panic!("expected learning item");
    };
    assert_eq!(item.review_count, 0);
    assert_eq!(item.archive_status, ArchiveStatus::Active);
    assert_eq!(item.sync_status, SyncStatus::Pending);
}

#[test]
fn apply_changes_updates_columns() {
    let record = EntityRecord::from(Topic::new("t-1", "u-1", "Rust", at(1)));
    let changes = json!({ "name": "Rust async", "updated_at": "2024-01-03T00:00:00Z" });

    let updated = record.apply_changes(changes.as_object().unwrap()).unwrap();
    let EntityRecord::Topic(topic) = updated else {
        panic!("expected topic");
    };
    assert_eq!(topic.name, "Rust async");
    assert_eq!(topic.updated_at, at(3));
    assert_eq!(topic.id, "t-1");
}

#[test]
fn apply_changes_rejects_wrong_types() {
    let record = EntityRecord::from(Topic::new("t-1", "u-1", "Rust", at(1)));
    let changes = json!({ "name": 42 });

    let err = record.apply_changes(changes.as_object().unwrap()).unwrap_err();
    assert!(matches!(err, Error::InvalidMutation { .. }));
}

#[test]
fn soft_delete_only_touches_soft_deletable_records() {
    let topic = EntityRecord::from(Topic::new("t-1", "u-1", "Rust", at(1))).soft_deleted(at(4));
    assert_eq!(topic.deleted_at(), Some(at(4)));
    assert_eq!(topic.updated_at(), at(4));

    let user = EntityRecord::from(User {
        id: "u-1".into(),
        email: "a@example.com".into(),
        display_name: None,
        created_at: at(1),
        updated_at: at(1),
        sync_status: SyncStatus::Synced,
    });
    assert_eq!(user.clone().soft_deleted(at(4)), user);
}
