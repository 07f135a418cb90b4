// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use chrono::{TimeZone, Utc};
use mnemo_core::Topic;
use yare::parameterized;

#[parameterized(
    network = { RemoteError::Network("offline".into()), true },
    validation = { RemoteError::Validation("bad".into()), false },
    auth = { RemoteError::Auth("expired".into()), false },
    not_found = { RemoteError::not_found(Table::Topics, "t-1"), false },
)]
fn retryable_classification(err: RemoteError, expected: bool) {
    assert_eq!(err.is_retryable(), expected);
}

#[test]
fn channel_names_are_deterministic() {
    let a = ChannelSpec::new(Table::Topics, Filter::eq("user_id", "u-1"));
    let b = ChannelSpec::new(Table::Topics, Filter::eq("user_id", "u-1"));
    let c = ChannelSpec::new(Table::LearningItems, Filter::eq("user_id", "u-1"));

    assert_eq!(a.name, "topics:user_id=eq.u-1");
    assert_eq!(a, b);
    assert_ne!(a.name, c.name);
}

#[test]
fn change_event_record_id() {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let insert = ChangeEvent::insert(Topic::new("t-1", "u-1", "Rust", now).into());
    let delete = ChangeEvent::delete(Table::Topics, "t-2");

    assert_eq!(insert.record_id(), Some("t-1"));
    assert_eq!(insert.event_type, ChangeType::Insert);
    assert_eq!(delete.record_id(), Some("t-2"));
    assert_eq!(delete.event_type, ChangeType::Delete);
}
