// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync engine: drains the offline queue against the remote.
//!
//! A drain takes one snapshot of the queue and applies it strictly in order.
//! Each operation ends in one of:
//! - applied: removed from the queue, record marked synced once nothing else
//!   references it (a merged record from a conflict is written back first)
//! - rejected: the remote refused the payload; removed and logged
//! - stale: failed and older than the staleness threshold; removed and logged
//! - kept: failed with a retryable error; retry count bumped
//!
//! Once an operation for a record is kept, later operations for that record
//! are skipped for the rest of the sweep so updates never overtake the create
//! they depend on. An auth failure keeps the operation and ends the sweep.
//!
//! `drain` never returns an error; outcomes are counted in [`DrainReport`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use mnemo_core::{
    ClockSource, EntityRecord, LocalStore, OpId, QueuedOperation, SyncStatus, Table,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::cache::Cache;
use crate::connectivity::{ConnectivityEvent, ConnectivityObserver};
use crate::handler::{ApplyOutcome, HandlerRegistry};
use crate::queue::OfflineQueue;
use crate::subscription::Subscription;

/// Error returned by a sync status listener.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener = Arc<dyn Fn(bool) -> Result<(), ListenerError> + Send + Sync>;

/// Configuration for the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Failing operations older than this are dropped.
    pub stale_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            stale_after: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Outcome counts of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    /// Operations that did not apply, including rejected, dropped and skipped ones.
    pub failed: usize,
    /// Stale operations removed without being applied.
    pub dropped: usize,
    /// Operations the remote refused as invalid.
    pub rejected: usize,
    /// The sweep stopped on an authentication failure.
    pub auth_failed: bool,
}

/// Resets the syncing flag when the drain ends.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener)>>,
}

impl Listeners {
    fn entries(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drains the offline queue. Share it as `Arc<SyncEngine>`.
pub struct SyncEngine {
    queue: Arc<OfflineQueue>,
    store: Arc<LocalStore>,
    cache: Arc<Cache>,
    handlers: HandlerRegistry,
    connectivity: Arc<dyn ConnectivityObserver>,
    clock: Arc<dyn ClockSource>,
    config: EngineConfig,
    syncing: AtomicBool,
    listeners: Arc<Listeners>,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<OfflineQueue>,
        store: Arc<LocalStore>,
        cache: Arc<Cache>,
        handlers: HandlerRegistry,
        connectivity: Arc<dyn ConnectivityObserver>,
        clock: Arc<dyn ClockSource>,
        config: EngineConfig,
    ) -> Self {
        SyncEngine {
            queue,
            store,
            cache,
            handlers,
            connectivity,
            clock,
            config,
            syncing: AtomicBool::new(false),
            listeners: Arc::new(Listeners::default()),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn pending_operations_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// Registers a listener called with `true` when a drain starts and `false` when it ends.
    pub fn on_sync_status_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.entries().push((id, Arc::new(listener)));

        let listeners: Weak<Listeners> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.entries().retain(|(entry, _)| *entry != id);
            }
        })
    }

    fn notify(&self, syncing: bool) {
        let listeners: Vec<Listener> =
            self.listeners.entries().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            if let Err(e) = listener(syncing) {
                tracing::warn!(syncing, error = %e, "sync status listener failed");
            }
        }
    }

    /// Applies every queued operation. A no-op when offline or already draining.
    pub async fn drain(&self) -> DrainReport {
        if !self.connectivity.is_online() {
            tracing::debug!("offline, skipping drain");
            return DrainReport::default();
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("drain already in progress");
            return DrainReport::default();
        }
        let _guard = SyncingGuard(&self.syncing);

        self.notify(true);
        let report = self.sweep().await;
        self.cache.sweep_expired();
        self.notify(false);

        if report != DrainReport::default() {
            tracing::info!(
                succeeded = report.succeeded,
                failed = report.failed,
                dropped = report.dropped,
                rejected = report.rejected,
                auth_failed = report.auth_failed,
                remaining = self.queue.pending_count(),
                "drained offline queue"
            );
        }
        report
    }

    async fn sweep(&self) -> DrainReport {
        let mut report = DrainReport::default();
        let mut blocked: HashSet<(Table, String)> = HashSet::new();
        let stale_ms = u64::try_from(self.config.stale_after.as_millis()).unwrap_or(u64::MAX);

        for snapshot in self.queue.list() {
            // An earlier merge in this sweep may have rebased it
            let Some(op) = self.queue.get(snapshot.id) else {
                continue;
            };
            let key = (op.table(), op.record_id().to_string());
            if blocked.contains(&key) {
                tracing::debug!(op_id = %op.id, "skipping operation behind a failed one");
                report.failed += 1;
                continue;
            }

            // Everything queued so far is reflected in the local record
            let reflected = self.queue.newest_id();
            let local = self.store.get(op.table(), op.record_id()).unwrap_or_else(|e| {
                tracing::warn!(op_id = %op.id, error = %e, "reading local record failed");
                None
            });

            let err = match self.handlers.apply(&op, local.as_ref()).await {
                Ok(outcome) => {
                    self.confirm(&op, outcome, reflected);
                    report.succeeded += 1;
                    continue;
                }
                Err(err) => err,
            };
            report.failed += 1;

            if op.is_older_than(self.clock.now_ms(), stale_ms) {
                tracing::warn!(
                    op_id = %op.id,
                    op_type = %op.operation_type(),
                    table = %op.table(),
                    record_id = op.record_id(),
                    retry_count = op.retry_count,
                    error = %err,
                    "dropping stale operation"
                );
                self.discard(&op);
                report.dropped += 1;
            } else if err.is_auth() {
                tracing::warn!(
                    op_id = %op.id,
                    error = %err,
                    "authentication failed, stopping drain"
                );
                self.record_retry(&op, &err.to_string());
                report.auth_failed = true;
                break;
            } else if !err.is_retryable() {
                tracing::error!(
                    op_id = %op.id,
                    op_type = %op.operation_type(),
                    table = %op.table(),
                    record_id = op.record_id(),
                    error = %err,
                    "remote rejected operation"
                );
                self.discard(&op);
                report.rejected += 1;
            } else {
                tracing::debug!(op_id = %op.id, error = %err, "operation failed, will retry");
                self.record_retry(&op, &err.to_string());
                blocked.insert(key);
            }
        }

        report
    }

    /// Applies the local side effects of a successful operation.
    ///
    /// A merge already folded every later update that `reflected` covers into
    /// the pushed record, so those updates are rebased onto it.
    fn confirm(&self, op: &QueuedOperation, outcome: ApplyOutcome, reflected: Option<OpId>) {
        if let ApplyOutcome::Merged(merged) = outcome {
            if let Some(through) = reflected {
                if let Err(e) = self.queue.rebase_updates(&merged, op.id, through) {
                    tracing::warn!(op_id = %op.id, error = %e, "rebasing later updates failed");
                }
            }
            self.write_merged(merged);
        }
        self.discard(op);
    }

    fn write_merged(&self, merged: EntityRecord) {
        let table = merged.table();
        // Stays pending if later operations still reference it
        if let Err(e) = self.store.put(&merged.with_sync_status(SyncStatus::Pending)) {
            tracing::warn!(%table, error = %e, "writing merged record failed");
        }
        self.cache.invalidate_table(table);
    }

    /// Removes an operation and marks its record synced if nothing else references it.
    fn discard(&self, op: &QueuedOperation) {
        if let Err(e) = self.queue.remove(op.id) {
            tracing::warn!(op_id = %op.id, error = %e, "removing operation failed");
            return;
        }
        if self.queue.has_pending_for(op.table(), op.record_id()) {
            return;
        }
        if let Err(e) = self.store.set_sync_status(op.table(), op.record_id(), SyncStatus::Synced) {
            tracing::warn!(op_id = %op.id, error = %e, "marking record synced failed");
        }
    }

    fn record_retry(&self, op: &QueuedOperation, error: &str) {
        if let Err(e) = self.queue.increment_retry(op.id, error) {
            tracing::warn!(op_id = %op.id, error = %e, "recording retry failed");
        }
    }

    /// Drains on reconnect and on focus while operations are pending.
    ///
    /// The task ends when the engine is dropped or the observer closes.
    pub fn spawn_triggers(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.connectivity.subscribe();
        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "connectivity events lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => return,
                };
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                match event {
                    ConnectivityEvent::Online => {
                        engine.drain().await;
                    }
                    ConnectivityEvent::FocusGained if engine.queue.has_pending() => {
                        engine.drain().await;
                    }
                    ConnectivityEvent::FocusGained | ConnectivityEvent::Offline => {}
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
