// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Wiring of the sync components into one shared handle.

use std::fs;
use std::sync::{Arc, Mutex};

use mnemo_core::{ClockSource, EntityRecord, LocalStore, SystemClock, Table};
use tokio::task::JoinHandle;

use crate::cache::{cache_key, Cache};
use crate::config::Config;
use crate::connectivity::ConnectivityObserver;
use crate::engine::SyncEngine;
use crate::error::Result;
use crate::handler::HandlerRegistry;
use crate::queue::OfflineQueue;
use crate::realtime::RealtimeManager;
use crate::remote::{ChangeFeed, Filter, RemoteResult, RemoteStore};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::writer::LocalWriter;

/// External services the sync layer talks to.
pub struct Services {
    pub remote: Arc<dyn RemoteStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub connectivity: Arc<dyn ConnectivityObserver>,
    pub clock: Arc<dyn ClockSource>,
    pub scheduler: Arc<dyn Scheduler>,
}

impl Services {
    /// Uses the system clock and tokio timers.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        connectivity: Arc<dyn ConnectivityObserver>,
    ) -> Self {
        Services {
            remote,
            feed,
            connectivity,
            clock: Arc::new(SystemClock),
            scheduler: Arc::new(TokioScheduler),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }
}

/// Shared handles to every sync component.
pub struct SyncContext {
    store: Arc<LocalStore>,
    queue: Arc<OfflineQueue>,
    cache: Arc<Cache>,
    engine: Arc<SyncEngine>,
    realtime: Arc<RealtimeManager>,
    writer: LocalWriter,
    remote: Arc<dyn RemoteStore>,
    triggers: Mutex<Option<JoinHandle<()>>>,
}

impl SyncContext {
    /// Opens the on-disk store under the configured data directory.
    pub fn open(config: &Config, services: Services) -> Result<Self> {
        fs::create_dir_all(config.data_dir())?;
        let store = LocalStore::open(&config.database_path())?;
        tracing::info!("opened local store at {}", config.database_path().display());
        Self::build(store, config, services)
    }

    /// Builds a context whose storage lives only in memory.
    pub fn in_memory(config: &Config, services: Services) -> Result<Self> {
        Self::build(LocalStore::open_in_memory()?, config, services)
    }

    fn build(store: LocalStore, config: &Config, services: Services) -> Result<Self> {
        let Services {
            remote,
            feed,
            connectivity,
            clock,
            scheduler,
        } = services;
        let store = Arc::new(store);

        let queue = Arc::new(OfflineQueue::open(store.clone(), Arc::clone(&clock))?);
        let cache = Arc::new(Cache::new(store.clone(), Arc::clone(&clock), config.cache()));
        let handlers = HandlerRegistry::with_remote(Arc::clone(&remote), Arc::clone(&clock));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&cache),
            handlers,
            connectivity,
            Arc::clone(&clock),
            config.engine(),
        ));
        let realtime = RealtimeManager::new(
            feed,
            Arc::clone(&store),
            Arc::clone(&cache),
            scheduler,
            Arc::clone(&clock),
            config.backoff(),
        );
        let writer =
            LocalWriter::new(Arc::clone(&store), Arc::clone(&queue), Arc::clone(&cache), clock);

        Ok(SyncContext {
            store,
            queue,
            cache,
            engine,
            realtime,
            writer,
            remote,
            triggers: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn realtime(&self) -> &Arc<RealtimeManager> {
        &self.realtime
    }

    pub fn writer(&self) -> &LocalWriter {
        &self.writer
    }

    /// Reads local records matching `filter`, leaving out soft-deleted ones.
    ///
    /// Includes pending changes that have not reached the remote yet.
    pub fn read_local(&self, table: Table, filter: &Filter) -> Result<Vec<EntityRecord>> {
        Ok(self.store.find_by(table, &filter.column, &filter.value)?)
    }

    /// Reads remote records matching `filter` through the cache.
    ///
    /// A network failure serves the last cached result, even if stale.
    pub async fn fetch(&self, table: Table, filter: Filter) -> RemoteResult<Vec<EntityRecord>> {
        let key = cache_key(table, &filter.to_string());
        let remote = Arc::clone(&self.remote);
        self.cache
            .fetch_with_fallback(&key, None, || async move { remote.query(table, &filter).await })
            .await
    }

    /// Starts draining on connectivity and focus events. Must run inside a tokio runtime.
    pub fn start(&self) {
        let mut triggers = self.triggers.lock().unwrap_or_else(|e| e.into_inner());
        if triggers.is_none() {
            *triggers = Some(self.engine.spawn_triggers());
        }
    }

    /// Stops the triggers and closes every realtime channel.
    ///
    /// Queued operations stay persisted for the next session.
    pub fn shutdown(&self) {
        if let Some(task) = self.triggers.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        self.realtime.unsubscribe_all();
        tracing::info!(pending = self.queue.pending_count(), "sync context shut down");
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
