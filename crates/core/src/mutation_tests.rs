// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::entity::{LearningItem, Topic};
use chrono::TimeZone;
use serde_json::json;
use yare::parameterized;

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

fn changes(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

#[test]
fn operation_type_parse() {
    assert_eq!("create".parse::<OperationType>().unwrap(), OperationType::Create);
    assert_eq!("delete".parse::<OperationType>().unwrap(), OperationType::Delete);
    assert!("upsert".parse::<OperationType>().is_err());
}

#[test]
fn mutation_accessors() {
    let create = Mutation::create(Topic::new("t-1", "u-1", "Rust", at(1)));
    assert_eq!(create.operation_type(), OperationType::Create);
    assert_eq!(create.table(), Table::Topics);
    assert_eq!(create.record_id(), "t-1");

    let delete = Mutation::delete(Table::LearningItems, "i-1");
    assert_eq!(delete.operation_type(), OperationType::Delete);
    assert_eq!(delete.record_id(), "i-1");
}

#[test]
fn based_on_only_applies_to_updates() {
    let update =
        Mutation::update(Table::Topics, "t-1", changes(json!({"name": "x"}))).based_on(at(2));
    assert_eq!(update.base_updated_at(), Some(at(2)));

    let delete = Mutation::delete(Table::Topics, "t-1").based_on(at(2));
    assert_eq!(delete.base_updated_at(), None);
}

#[parameterized(
    empty_id = { Mutation::delete(Table::Topics, " ") },
    no_changes = { Mutation::update(Table::Topics, "t-1", Map::new()) },
    unknown_column = { Mutation::update(Table::Topics, "t-1", changes(json!({"colour": "red"}))) },
    local_only_column = {
        Mutation::update(Table::Topics, "t-1", changes(json!({"sync_status": "synced"})))
    },
    changes_id = { Mutation::update(Table::Topics, "t-1", changes(json!({"id": "t-2"}))) },
    wrong_table_column = {
        Mutation::update(Table::DailyStats, "d-1", changes(json!({"content": "x"})))
    },
)]
fn validate_rejects(mutation: Mutation) {
    assert!(matches!(mutation.validate(), Err(Error::InvalidMutation { .. })));
}

#[test]
fn validate_accepts_known_columns() {
    let update = Mutation::update(
        Table::LearningItems,
        "i-1",
        changes(json!({"id": "i-1", "review_count": 4, "next_review_at": "2024-01-05T00:00:00Z"})),
    );
    assert!(update.validate().is_ok());
}

#[test]
fn rebase_takes_merged_values_and_base() {
    let mut merged = Topic::new("t-1", "u-1", "Merged", at(3));
    merged.description = Some("kept".into());
    let mut update = RecordUpdate {
        table: Table::Topics,
        id: "t-1".into(),
        changes: changes(json!({"name": "Local", "updated_at": "2024-01-02T00:00:00Z"})),
        base_updated_at: Some(at(1)),
    };

    update.rebase(&merged.into()).unwrap();

    assert_eq!(update.base_updated_at, Some(at(3)));
    assert_eq!(update.changes["name"], json!("Merged"));
    assert_eq!(update.changes["updated_at"], serde_json::to_value(at(3)).unwrap());
    // Columns the update never touched stay out of it
    assert!(!update.changes.contains_key("description"));
}

#[test]
fn rebase_rejects_other_record() {
    let mut update = RecordUpdate {
        table: Table::Topics,
        id: "t-1".into(),
        changes: changes(json!({"name": "x"})),
        base_updated_at: None,
    };

    let other = Topic::new("t-2", "u-1", "Other", at(1)).into();

    assert!(matches!(update.rebase(&other), Err(Error::MismatchedRecords { .. })));
    assert_eq!(update.base_updated_at, None);
}

#[test]
fn update_data_includes_id() {
    let update = Mutation::update(Table::Topics, "t-1", changes(json!({"name": "Async"})));
    assert_eq!(update.data().unwrap(), json!({"id": "t-1", "name": "Async"}));

    let delete = Mutation::delete(Table::Topics, "t-1");
    assert_eq!(delete.data().unwrap(), json!({"id": "t-1"}));
}

#[test]
fn queued_operation_persisted_layout() {
    let op = QueuedOperation::new(
        OpId::new(1_704_067_200_000, 0),
        Mutation::update(Table::Topics, "t-1", changes(json!({"name": "Async"}))).based_on(at(1)),
    );

    let value = serde_json::to_value(&op).unwrap();
    assert_eq!(
        value,
        json!({
            "id": "1704067200000-0",
            "type": "update",
            "table": "topics",
            "data": {"id": "t-1", "name": "Async"},
            "timestamp": 1_704_067_200_000u64,
            "retryCount": 0,
            "baseUpdatedAt": "2024-01-01T00:00:00Z"
        })
    );

    let back: QueuedOperation = serde_json::from_value(value).unwrap();
    assert_eq!(back, op);
}

#[test]
fn queued_create_carries_full_record() {
    let item = LearningItem::new("i-1", "u-1", "t-1", "borrowing", at(1));
    let mut op = QueuedOperation::new(OpId::new(10, 0), Mutation::create(item.clone()));
    op.retry_count = 2;
    op.last_error = Some("network down".into());

    let value = serde_json::to_value(&op).unwrap();
    assert_eq!(value["data"]["content"], json!("borrowing"));
    assert_eq!(value["lastError"], json!("network down"));

    let back: QueuedOperation = serde_json::from_value(value).unwrap();
    assert_eq!(back.mutation, Mutation::create(item));
    assert_eq!(back.retry_count, 2);
}

#[test]
fn deserialize_rejects_invalid_payload() {
    let value = json!({
        "id": "10-0",
        "type": "update",
        "table": "topics",
        "data": {"name": "missing id"},
        "timestamp": 10
    });
    assert!(serde_json::from_value::<QueuedOperation>(value).is_err());
}

#[test]
fn staleness() {
    let op = QueuedOperation::new(OpId::new(1_000, 0), Mutation::delete(Table::Topics, "t-1"));
    assert_eq!(op.age_ms(1_500), 500);
    assert_eq!(op.age_ms(500), 0);
    assert!(op.is_older_than(2_001, 1_000));
    assert!(!op.is_older_than(2_000, 1_000));
}
