// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! mnemo-core: Shared data layer for the mnemo offline-first client
//!
//! This crate provides the synced entity types, typed local mutations, the
//! pure conflict-resolution policies and the SQLite local store used by the
//! sync engine in `mnemo-sync`.

pub mod clock;
pub mod entity;
pub mod error;
pub mod kv;
pub mod mutation;
pub mod resolve;
pub mod store;

pub use clock::{datetime_from_ms, ClockSource, ManualClock, OpId, OpIdGenerator, SystemClock};
pub use entity::{
    ArchiveStatus, DailyStats, EntityRecord, GamificationStats, LearningItem, Record,
    ReviewSession, Subject, SyncStatus, Table, Topic, User,
};
pub use error::{Error, Result};
pub use kv::{KeyValueStore, MemoryKv};
pub use mutation::{Mutation, OperationType, QueuedOperation, RecordUpdate};
pub use resolve::{
    last_write_wins, resolve, resolve_daily_stats, resolve_gamification_stats,
    resolve_learning_item, resolve_topic,
};
pub use store::LocalStore;
