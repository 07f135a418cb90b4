// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test doubles for the remote, the change feed and the scheduler.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use mnemo_core::{EntityRecord, LearningItem, SyncStatus, Table, Topic};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Notify};

use crate::remote::{
    ChangeFeed, ChannelEvent, ChannelSpec, Filter, RemoteError, RemoteFuture, RemoteResult,
    RemoteStore,
};
use crate::scheduler::{Scheduler, Task, TimerHandle};

/// Midnight UTC on the given day of January 2024.
pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

/// Milliseconds since epoch of [`day`].
pub fn day_ms(d: u32) -> u64 {
    u64::try_from(day(d).timestamp_millis()).unwrap()
}

pub fn topic(id: &str, name: &str, updated_at: DateTime<Utc>) -> EntityRecord {
    Topic::new(id, "u-1", name, updated_at).into()
}

pub fn item(id: &str, topic_id: &str, updated_at: DateTime<Utc>) -> EntityRecord {
    LearningItem::new(id, "u-1", topic_id, "content", updated_at).into()
}

pub fn changes(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Whether a record's column equals the filter value, compared as text.
pub fn matches_filter(filter: &Filter, record: &EntityRecord) -> bool {
    let Ok(value) = record.to_value() else {
        return false;
    };
    match value.get(&filter.column) {
        Some(Value::String(s)) => *s == filter.value,
        Some(other) => other.to_string() == filter.value,
        None => false,
    }
}

/// In-memory remote with call logging, failure injection and an optional gate.
#[derive(Default)]
pub struct MockRemote {
    records: Mutex<HashMap<(Table, String), EntityRecord>>,
    calls: Mutex<Vec<String>>,
    next_failures: Mutex<VecDeque<RemoteError>>,
    failing_ids: Mutex<HashMap<String, RemoteError>>,
    failing_calls: Mutex<HashMap<String, RemoteError>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stores a record as if another client had written it.
    pub fn seed(&self, record: EntityRecord) {
        let record = record.with_sync_status(SyncStatus::Synced);
        self.records.lock().unwrap().insert((record.table(), record.id().to_string()), record);
    }

    pub fn get(&self, table: Table, id: &str) -> Option<EntityRecord> {
        self.records.lock().unwrap().get(&(table, id.to_string())).cloned()
    }

    /// Calls made so far, e.g. `"create topics/t-1"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Fails the next call with `err`.
    pub fn fail_next(&self, err: RemoteError) {
        self.next_failures.lock().unwrap().push_back(err);
    }

    /// Fails every call touching `id` until [`MockRemote::heal`] is called.
    pub fn fail_record(&self, id: &str, err: RemoteError) {
        self.failing_ids.lock().unwrap().insert(id.to_string(), err);
    }

    /// Fails every call named `call`, e.g. `"fetch topics/t-1"`.
    pub fn fail_call(&self, call: &str, err: RemoteError) {
        self.failing_calls.lock().unwrap().insert(call.to_string(), err);
    }

    pub fn heal(&self, id: &str) {
        self.failing_ids.lock().unwrap().remove(id);
    }

    /// Makes every call wait until the returned notify is signalled once per call.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    async fn enter(&self, call: String, id: &str) -> RemoteResult<()> {
        self.calls.lock().unwrap().push(call.clone());
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.next_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(err) = self.failing_ids.lock().unwrap().get(id) {
            return Err(err.clone());
        }
        if let Some(err) = self.failing_calls.lock().unwrap().get(&call) {
            return Err(err.clone());
        }
        Ok(())
    }
}

impl RemoteStore for MockRemote {
    fn create<'a>(&'a self, record: &'a EntityRecord) -> RemoteFuture<'a, EntityRecord> {
        Box::pin(async move {
            self.enter(format!("create {}/{}", record.table(), record.id()), record.id()).await?;
            let stored = record.clone().with_sync_status(SyncStatus::Synced);
            self.seed(stored.clone());
            Ok(stored)
        })
    }

    fn update<'a>(
        &'a self,
        table: Table,
        id: &'a str,
        changes: &'a Map<String, Value>,
    ) -> RemoteFuture<'a, EntityRecord> {
        Box::pin(async move {
            self.enter(format!("update {table}/{id}"), id).await?;
            let existing = self.get(table, id).ok_or_else(|| RemoteError::not_found(table, id))?;
            let stored = existing
                .apply_changes(changes)
                .map_err(|e| RemoteError::Validation(e.to_string()))?;
            self.seed(stored.clone());
            Ok(stored)
        })
    }

    fn delete<'a>(&'a self, table: Table, id: &'a str) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            self.enter(format!("delete {table}/{id}"), id).await?;
            self.records
                .lock()
                .unwrap()
                .remove(&(table, id.to_string()))
                .map(|_| ())
                .ok_or_else(|| RemoteError::not_found(table, id))
        })
    }

    fn fetch<'a>(&'a self, table: Table, id: &'a str) -> RemoteFuture<'a, Option<EntityRecord>> {
        Box::pin(async move {
            self.enter(format!("fetch {table}/{id}"), id).await?;
            Ok(self.get(table, id))
        })
    }

    fn query<'a>(
        &'a self,
        table: Table,
        filter: &'a Filter,
    ) -> RemoteFuture<'a, Vec<EntityRecord>> {
        Box::pin(async move {
            self.enter(format!("query {table}/{filter}"), "").await?;
            let records = self.records.lock().unwrap();
            let mut matches: Vec<EntityRecord> = records
                .values()
                .filter(|r| r.table() == table && matches_filter(filter, r))
                .cloned()
                .collect();
            matches.sort_by(|a, b| a.id().cmp(b.id()));
            Ok(matches)
        })
    }
}

/// Change feed that hands its sinks to the test.
#[derive(Default)]
pub struct MockFeed {
    sinks: Mutex<HashMap<String, mpsc::UnboundedSender<ChannelEvent>>>,
    subscribes: Mutex<Vec<String>>,
    unsubscribes: Mutex<Vec<String>>,
    next_failures: Mutex<VecDeque<RemoteError>>,
    always_fail: Mutex<Option<RemoteError>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, err: RemoteError) {
        self.next_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_always(&self, err: RemoteError) {
        *self.always_fail.lock().unwrap() = Some(err);
    }

    /// Makes subscribe calls wait until the returned notify is signalled.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Names passed to `subscribe`, in call order.
    pub fn subscribes(&self) -> Vec<String> {
        self.subscribes.lock().unwrap().clone()
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        self.unsubscribes.lock().unwrap().clone()
    }

    /// Channels currently established, sorted.
    pub fn live_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sinks.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Delivers an event on a live channel. Returns false if it is not live.
    pub fn push(&self, name: &str, event: ChannelEvent) -> bool {
        match self.sinks.lock().unwrap().get(name) {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }

    /// Drops a channel's sink as if the connection closed.
    pub fn close(&self, name: &str) {
        self.sinks.lock().unwrap().remove(name);
    }
}

impl ChangeFeed for MockFeed {
    fn subscribe<'a>(
        &'a self,
        channel: &'a ChannelSpec,
        sink: mpsc::UnboundedSender<ChannelEvent>,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            self.subscribes.lock().unwrap().push(channel.name.clone());
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if let Some(err) = self.next_failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            if let Some(err) = self.always_fail.lock().unwrap().clone() {
                return Err(err);
            }
            self.sinks.lock().unwrap().insert(channel.name.clone(), sink);
            Ok(())
        })
    }

    fn unsubscribe(&self, name: &str) {
        self.unsubscribes.lock().unwrap().push(name.to_string());
        self.sinks.lock().unwrap().remove(name);
    }
}

/// Scheduler that records requests and runs them only when the test says so.
#[derive(Default)]
pub struct RecordingScheduler {
    pending: Mutex<VecDeque<(Task, TimerHandle)>>,
    delays: Mutex<Vec<Duration>>,
    handles: Mutex<Vec<TimerHandle>>,
}

impl RecordingScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every delay requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    /// Handles of every timer created so far.
    pub fn handles(&self) -> Vec<TimerHandle> {
        self.handles.lock().unwrap().clone()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Runs the oldest scheduled task unless it was cancelled.
    /// Returns false if nothing ran.
    pub async fn fire_next(&self) -> bool {
        let next = self.pending.lock().unwrap().pop_front();
        match next {
            Some((task, handle)) if !handle.is_cancelled() => {
                task.await;
                true
            }
            _ => false,
        }
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::default();
        self.delays.lock().unwrap().push(delay);
        self.handles.lock().unwrap().push(handle.clone());
        self.pending.lock().unwrap().push_back((task, handle.clone()));
        handle
    }
}
