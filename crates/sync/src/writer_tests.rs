// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use super::*;
use crate::cache::CacheConfig;
use crate::error::Error;
use crate::test_helpers::{changes, day, day_ms, item, topic};
use mnemo_core::{ManualClock, MemoryKv, OperationType};
use serde_json::json;

struct Fixture {
    store: Arc<LocalStore>,
    queue: Arc<OfflineQueue>,
    cache: Arc<Cache>,
    clock: Arc<ManualClock>,
    writer: LocalWriter,
}

fn fixture() -> Fixture {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(day_ms(1)));
    let queue = Arc::new(OfflineQueue::open(store.clone(), clock.clone()).unwrap());
    let cache = Arc::new(Cache::new(store.clone(), clock.clone(), CacheConfig::default()));
    let writer = LocalWriter::new(store.clone(), queue.clone(), cache.clone(), clock.clone());
    Fixture {
        store,
        queue,
        cache,
        clock,
        writer,
    }
}

/// A writer whose queue storage has no room for a single operation.
fn full_queue_fixture() -> Fixture {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(day_ms(1)));
    let kv = Arc::new(MemoryKv::with_quota(10));
    let queue = Arc::new(OfflineQueue::open(kv, clock.clone()).unwrap());
    let cache = Arc::new(Cache::new(store.clone(), clock.clone(), CacheConfig::default()));
    let writer = LocalWriter::new(store.clone(), queue.clone(), cache.clone(), clock.clone());
    Fixture {
        store,
        queue,
        cache,
        clock,
        writer,
    }
}

#[test]
fn create_writes_pending_record_and_queues() {
    let f = fixture();

    f.writer.create(topic("t-1", "Rust", day(1))).unwrap();

    let record = f.store.require(Table::Topics, "t-1").unwrap();
    assert_eq!(record.sync_status(), SyncStatus::Pending);
    let ops = f.queue.list();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].operation_type(), OperationType::Create);
}

#[test]
fn create_with_empty_id_is_rejected_before_writing() {
    let f = fixture();

    let err = f.writer.create(topic("", "Rust", day(1))).unwrap_err();

    assert!(matches!(err, Error::Queue(QueueError::Invalid(_))));
    assert!(f.store.list(Table::Topics).unwrap().is_empty());
    assert!(!f.queue.has_pending());
}

#[test]
fn update_stamps_time_and_records_base() {
    let f = fixture();
    f.store.put(&topic("t-1", "Rust", day(1)).with_sync_status(SyncStatus::Synced)).unwrap();
    f.clock.set(day_ms(2));

    f.writer.update(Table::Topics, "t-1", changes(&[("name", json!("Go"))])).unwrap();

    let EntityRecord::Topic(stored) = f.store.require(Table::Topics, "t-1").unwrap() else {
        panic!("expected topic");
    };
    assert_eq!(stored.name, "Go");
    assert_eq!(stored.updated_at, day(2));
    assert_eq!(stored.sync_status, SyncStatus::Pending);

    let ops = f.queue.list();
    let Mutation::Update(update) = &ops[0].mutation else {
        panic!("expected update");
    };
    assert_eq!(update.base_updated_at, Some(day(1)));
}

#[test]
fn update_rejects_unknown_column() {
    let f = fixture();
    f.store.put(&topic("t-1", "Rust", day(1))).unwrap();

    let err = f.writer.update(Table::Topics, "t-1", changes(&[("bogus", json!(1))])).unwrap_err();

    assert!(matches!(err, Error::Queue(QueueError::Invalid(_))));
    assert!(!f.queue.has_pending());
}

#[test]
fn update_rejects_mistyped_value() {
    let f = fixture();
    f.store.put(&item("i-1", "t-1", day(1))).unwrap();

    let err = f
        .writer
        .update(Table::LearningItems, "i-1", changes(&[("review_count", json!("many"))]))
        .unwrap_err();

    assert!(matches!(err, Error::Store(mnemo_core::Error::InvalidMutation { .. })));
    assert!(!f.queue.has_pending());
}

#[test]
fn update_of_missing_record_fails() {
    let f = fixture();
    let err = f.writer.update(Table::Topics, "nope", changes(&[("name", json!("x"))])).unwrap_err();
    assert!(matches!(err, Error::Store(mnemo_core::Error::RecordNotFound { .. })));
}

#[test]
fn delete_is_soft_for_topics() {
    let f = fixture();
    f.store.put(&topic("t-1", "Rust", day(1))).unwrap();
    f.clock.set(day_ms(3));

    f.writer.delete(Table::Topics, "t-1").unwrap();

    let record = f.store.require(Table::Topics, "t-1").unwrap();
    assert_eq!(record.deleted_at(), Some(day(3)));
    assert_eq!(f.queue.list()[0].operation_type(), OperationType::Delete);
}

#[test]
fn writes_invalidate_table_cache() {
    let f = fixture();
    f.cache.set("topics:user:u-1", &vec!["t-0"], None);
    f.cache.set("subjects:user:u-1", &vec!["s-0"], None);

    f.writer.create(topic("t-1", "Rust", day(1))).unwrap();

    assert_eq!(f.cache.get::<Vec<String>>("topics:user:u-1"), None);
    assert!(f.cache.get::<Vec<String>>("subjects:user:u-1").is_some());
}

#[test]
fn create_is_undone_when_queue_is_full() {
    let f = full_queue_fixture();

    let err = f.writer.create(topic("t-1", "Rust", day(1))).unwrap_err();

    assert!(matches!(err, Error::Queue(QueueError::Storage(_))));
    assert_eq!(f.store.get(Table::Topics, "t-1").unwrap(), None);
    assert!(!f.queue.has_pending());
}

#[test]
fn update_is_undone_when_queue_is_full() {
    let f = full_queue_fixture();
    f.store.put(&topic("t-1", "Rust", day(1)).with_sync_status(SyncStatus::Synced)).unwrap();
    f.clock.set(day_ms(2));

    let result = f.writer.update(Table::Topics, "t-1", changes(&[("name", json!("Go"))]));

    assert!(matches!(result, Err(Error::Queue(_))));
    let EntityRecord::Topic(stored) = f.store.require(Table::Topics, "t-1").unwrap() else {
        panic!("expected topic");
    };
    assert_eq!((stored.name.as_str(), stored.updated_at), ("Rust", day(1)));
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert!(!f.queue.has_pending());
}

#[test]
fn delete_is_undone_when_queue_is_full() {
    let f = full_queue_fixture();
    f.store.put(&item("i-1", "t-1", day(1)).with_sync_status(SyncStatus::Synced)).unwrap();
    f.clock.set(day_ms(3));

    let result = f.writer.delete(Table::LearningItems, "i-1");

    assert!(matches!(result, Err(Error::Queue(_))));
    let record = f.store.require(Table::LearningItems, "i-1").unwrap();
    assert_eq!(record.deleted_at(), None);
    assert_eq!(record.sync_status(), SyncStatus::Synced);
}
