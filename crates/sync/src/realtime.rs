// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime subscription manager.
//!
//! Keeps one push channel per resource filter. Remote changes are written to
//! the local store (unless the local copy has unsynced changes, which the
//! offline queue reconciles), the table's cache entries are invalidated and
//! the subscriber's handlers are called. A remote delete on a soft-deletable
//! table sets `deleted_at` on the local row instead of removing it.
//!
//! Channel lifecycle:
//! - subscribing to a name that already has a channel tears the old one down
//! - a subscribe while another for the same name is in flight is dropped
//! - a failed channel reconnects after `base_delay * 2^attempt`; the attempt
//!   counter resets once a connect succeeds
//! - when attempts run out, `on_error` is called once with the last error

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use mnemo_core::{ClockSource, LocalStore, SyncStatus, Table};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::remote::{
    ChangeEvent, ChangeFeed, ChangeType, ChannelEvent, ChannelSpec, Filter, RemoteError,
};
use crate::scheduler::{Backoff, Scheduler, TimerHandle};
use crate::subscription::Subscription;

type ChangeCallback = Box<dyn Fn(&ChangeEvent) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&RemoteError) + Send + Sync>;

/// Callbacks for one subscription. Every callback is optional.
#[derive(Default)]
pub struct ChannelHandlers {
    on_insert: Option<ChangeCallback>,
    on_update: Option<ChangeCallback>,
    on_delete: Option<ChangeCallback>,
    on_error: Option<ErrorCallback>,
}

impl ChannelHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_insert(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_insert = Some(Box::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Box::new(f));
        self
    }

    /// Called once when the channel has failed and reconnects are exhausted.
    pub fn on_error(mut self, f: impl Fn(&RemoteError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    fn dispatch(&self, change: &ChangeEvent) {
        let handler = match change.event_type {
            ChangeType::Insert => &self.on_insert,
            ChangeType::Update => &self.on_update,
            ChangeType::Delete => &self.on_delete,
        };
        if let Some(handler) = handler {
            handler(change);
        }
    }
}

struct Registration {
    spec: ChannelSpec,
    handlers: Arc<ChannelHandlers>,
    /// Distinguishes this registration from later ones under the same name.
    generation: u64,
}

struct ActiveChannel {
    cancel: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct RealtimeState {
    registrations: HashMap<String, Registration>,
    channels: HashMap<String, ActiveChannel>,
    /// Names with a subscribe in flight.
    locks: HashSet<String>,
    attempts: HashMap<String, u32>,
    timers: HashMap<String, TimerHandle>,
    next_generation: u64,
}

/// Manages realtime channels. Construct with [`RealtimeManager::new`].
pub struct RealtimeManager {
    feed: Arc<dyn ChangeFeed>,
    store: Arc<LocalStore>,
    cache: Arc<Cache>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn ClockSource>,
    backoff: Backoff,
    state: Mutex<RealtimeState>,
    me: Weak<RealtimeManager>,
}

impl RealtimeManager {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        store: Arc<LocalStore>,
        cache: Arc<Cache>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn ClockSource>,
        backoff: Backoff,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| RealtimeManager {
            feed,
            store,
            cache,
            scheduler,
            clock,
            backoff,
            state: Mutex::new(RealtimeState::default()),
            me: me.clone(),
        })
    }

    fn state(&self) -> MutexGuard<'_, RealtimeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All topics of a user.
    pub async fn subscribe_to_topics(
        &self,
        user_id: &str,
        handlers: ChannelHandlers,
    ) -> Subscription {
        let spec = ChannelSpec::new(Table::Topics, Filter::eq("user_id", user_id));
        self.subscribe(spec, handlers).await
    }

    /// All subjects of a user.
    pub async fn subscribe_to_subjects(
        &self,
        user_id: &str,
        handlers: ChannelHandlers,
    ) -> Subscription {
        let spec = ChannelSpec::new(Table::Subjects, Filter::eq("user_id", user_id));
        self.subscribe(spec, handlers).await
    }

    /// One topic.
    pub async fn subscribe_topic(&self, topic_id: &str, handlers: ChannelHandlers) -> Subscription {
        self.subscribe(ChannelSpec::new(Table::Topics, Filter::eq("id", topic_id)), handlers).await
    }

    /// Learning items of one topic.
    pub async fn subscribe_to_topic_items(
        &self,
        topic_id: &str,
        handlers: ChannelHandlers,
    ) -> Subscription {
        let spec = ChannelSpec::new(Table::LearningItems, Filter::eq("topic_id", topic_id));
        self.subscribe(spec, handlers).await
    }

    /// All learning items of a user.
    pub async fn subscribe_to_user_items(
        &self,
        user_id: &str,
        handlers: ChannelHandlers,
    ) -> Subscription {
        let spec = ChannelSpec::new(Table::LearningItems, Filter::eq("user_id", user_id));
        self.subscribe(spec, handlers).await
    }

    /// Opens a channel, replacing any existing channel with the same name.
    ///
    /// If a subscribe for the same name is already in flight this call does
    /// nothing, but the returned handle still unsubscribes that name.
    pub async fn subscribe(&self, spec: ChannelSpec, handlers: ChannelHandlers) -> Subscription {
        let name = spec.name.clone();
        let generation = {
            let mut state = self.state();
            if state.locks.contains(&name) {
                tracing::debug!(channel = %name, "subscribe already in flight");
                return self.unsubscribe_handle(name);
            }
            state.locks.insert(name.clone());

            self.teardown(&mut state, &name);
            if let Some(timer) = state.timers.remove(&name) {
                timer.cancel();
            }
            state.attempts.remove(&name);

            state.next_generation += 1;
            let generation = state.next_generation;
            state.registrations.insert(
                name.clone(),
                Registration {
                    spec,
                    handlers: Arc::new(handlers),
                    generation,
                },
            );
            generation
        };

        self.connect(&name, generation).await;
        self.unsubscribe_handle(name)
    }

    fn unsubscribe_handle(&self, name: String) -> Subscription {
        let me = self.me.clone();
        Subscription::new(move || {
            if let Some(manager) = me.upgrade() {
                manager.unsubscribe(&name);
            }
        })
    }

    /// Establishes the registered channel. The caller holds the name's lock.
    async fn connect(&self, name: &str, generation: u64) {
        let spec = match self.state().registrations.get(name) {
            Some(registration) if registration.generation == generation => {
                registration.spec.clone()
            }
            _ => return,
        };

        let (sink, events) = mpsc::unbounded_channel();
        let result = self.feed.subscribe(&spec, sink).await;

        let exhausted = {
            let mut state = self.state();
            let current = state.registrations.get(name).map(|r| r.generation);
            if current != Some(generation) {
                // Unsubscribed or replaced while connecting
                if current.is_none() {
                    self.feed.unsubscribe(name);
                }
                return;
            }
            state.locks.remove(name);

            match result {
                Ok(()) => {
                    state.attempts.remove(name);
                    let cancel = CancellationToken::new();
                    let replaced = state.channels.insert(
                        name.to_string(),
                        ActiveChannel {
                            cancel: cancel.clone(),
                            generation,
                        },
                    );
                    if let Some(old) = replaced {
                        old.cancel.cancel();
                    }
                    let me = self.me.clone();
                    tokio::spawn(pump(me, name.to_string(), generation, events, cancel));
                    tracing::info!(channel = %name, "realtime channel subscribed");
                    None
                }
                Err(err) => self.schedule_reconnect(&mut state, name, err),
            }
        };

        if let Some((handlers, err)) = exhausted {
            if let Some(on_error) = &handlers.on_error {
                on_error(&err);
            }
        }
    }

    /// Schedules the next reconnect, or returns the handlers to notify once attempts run out.
    fn schedule_reconnect(
        &self,
        state: &mut RealtimeState,
        name: &str,
        err: RemoteError,
    ) -> Option<(Arc<ChannelHandlers>, RemoteError)> {
        let attempt = state.attempts.get(name).copied().unwrap_or(0);
        let Some(delay) = self.backoff.delay_for(attempt) else {
            tracing::warn!(
                channel = %name,
                attempts = attempt,
                error = %err,
                "realtime reconnects exhausted"
            );
            state.attempts.remove(name);
            let handlers = state.registrations.get(name).map(|r| Arc::clone(&r.handlers))?;
            return Some((handlers, err));
        };

        state.attempts.insert(name.to_string(), attempt + 1);
        tracing::debug!(
            channel = %name,
            attempt = attempt + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "scheduling realtime reconnect"
        );

        let me = self.me.clone();
        let retry_name = name.to_string();
        let timer = self.scheduler.schedule(
            delay,
            Box::pin(async move {
                if let Some(manager) = me.upgrade() {
                    manager.reconnect(&retry_name).await;
                }
            }),
        );
        if let Some(old) = state.timers.insert(name.to_string(), timer) {
            old.cancel();
        }
        None
    }

    async fn reconnect(&self, name: &str) {
        let generation = {
            let mut state = self.state();
            state.timers.remove(name);
            let Some(generation) = state.registrations.get(name).map(|r| r.generation) else {
                return;
            };
            if !state.locks.insert(name.to_string()) {
                return;
            }
            generation
        };
        self.connect(name, generation).await;
    }

    /// Closes an established channel.
    fn teardown(&self, state: &mut RealtimeState, name: &str) {
        if let Some(channel) = state.channels.remove(name) {
            channel.cancel.cancel();
            self.feed.unsubscribe(name);
            tracing::info!(channel = %name, "realtime channel closed");
        }
    }

    /// Called by a channel's pump when the channel fails.
    fn channel_failed(&self, name: &str, generation: u64, err: RemoteError) {
        let exhausted = {
            let mut state = self.state();
            let current = state.channels.get(name).map(|c| c.generation);
            if current != Some(generation) {
                return;
            }
            self.teardown(&mut state, name);
            self.schedule_reconnect(&mut state, name, err)
        };
        if let Some((handlers, err)) = exhausted {
            if let Some(on_error) = &handlers.on_error {
                on_error(&err);
            }
        }
    }

    fn dispatch(&self, name: &str, change: &ChangeEvent) {
        self.apply_to_store(change);
        self.cache.invalidate_table(change.table);

        let handlers = self.state().registrations.get(name).map(|r| Arc::clone(&r.handlers));
        if let Some(handlers) = handlers {
            handlers.dispatch(change);
        }
    }

    fn apply_to_store(&self, change: &ChangeEvent) {
        let Some(id) = change.record_id() else {
            tracing::debug!(table = %change.table, "change without record id");
            return;
        };
        let table = change.table;
        match self.store.sync_status(table, id) {
            Ok(Some(SyncStatus::Pending)) => {
                tracing::debug!(%table, id, "keeping local record with pending changes");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%table, id, error = %e, "reading local record failed");
                return;
            }
        }

        let result = match (&change.event_type, &change.new) {
            (ChangeType::Delete, _) if table.is_soft_deletable() => self.soft_delete(change, id),
            (ChangeType::Delete, _) => self.store.remove(table, id).map(|_| ()),
            (_, Some(record)) => {
                self.store.put(&record.clone().with_sync_status(SyncStatus::Synced))
            }
            (_, None) => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(%table, id, error = %e, "applying remote change failed");
        }
    }

    /// Keeps the row and stamps `deleted_at`, taken from the event when it carries one.
    fn soft_delete(&self, change: &ChangeEvent, id: &str) -> mnemo_core::Result<()> {
        let Some(local) = self.store.get(change.table, id)? else {
            return Ok(());
        };
        if local.deleted_at().is_some() {
            return Ok(());
        }
        let deleted_at = change
            .old
            .as_ref()
            .and_then(|old| old.get("deleted_at"))
            .and_then(|at| serde_json::from_value::<DateTime<Utc>>(at.clone()).ok())
            .unwrap_or_else(|| self.clock.now_utc());
        self.store.put(&local.soft_deleted(deleted_at).with_sync_status(SyncStatus::Synced))
    }

    /// Ends a subscription: closes its channel and cancels any pending reconnect.
    pub fn unsubscribe(&self, name: &str) {
        let mut state = self.state();
        state.registrations.remove(name);
        self.teardown(&mut state, name);
        if let Some(timer) = state.timers.remove(name) {
            timer.cancel();
        }
        state.attempts.remove(name);
        state.locks.remove(name);
    }

    /// Ends every subscription.
    pub fn unsubscribe_all(&self) {
        let mut state = self.state();
        let names: Vec<String> = state.channels.keys().cloned().collect();
        for name in names {
            self.teardown(&mut state, &name);
        }
        for (_, timer) in state.timers.drain() {
            timer.cancel();
        }
        state.registrations.clear();
        state.attempts.clear();
        state.locks.clear();
    }

    /// Names of established channels, sorted.
    pub fn active_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Failed connects since the channel last succeeded.
    pub fn attempt_count(&self, name: &str) -> u32 {
        self.state().attempts.get(name).copied().unwrap_or(0)
    }

    pub fn has_pending_reconnect(&self, name: &str) -> bool {
        self.state().timers.contains_key(name)
    }
}

/// Forwards a channel's events to the manager until cancelled or failed.
async fn pump(
    manager: Weak<RealtimeManager>,
    name: String,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        let Some(manager) = manager.upgrade() else {
            return;
        };
        match event {
            Some(ChannelEvent::Change(change)) => manager.dispatch(&name, &change),
            Some(ChannelEvent::Error(err)) => {
                manager.channel_failed(&name, generation, err);
                return;
            }
            None => {
                let err = RemoteError::Network("channel closed".into());
                manager.channel_failed(&name, generation, err);
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "realtime_tests.rs"]
mod tests;
