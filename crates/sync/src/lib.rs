// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! mnemo-sync - Offline-first synchronization for the mnemo client.
//!
//! Local writes land in the [`LocalStore`](mnemo_core::LocalStore) first and
//! are queued in the [`OfflineQueue`]. The [`SyncEngine`] drains the queue
//! against a [`RemoteStore`] whenever the device is online, resolving write
//! conflicts per entity. The [`RealtimeManager`] keeps push channels open and
//! folds remote changes back into the store, and the [`Cache`] serves reads
//! with a stale fallback when the network is down.
//!
//! # Main Components
//!
//! - [`SyncContext`] - Builds and owns every component below
//! - [`LocalWriter`] - The local write path
//! - [`OfflineQueue`] - Durable FIFO of pending mutations
//! - [`SyncEngine`] - Sequential queue drainer
//! - [`RealtimeManager`] - Push channels with exponential-backoff reconnects
//! - [`Cache`] - Two-tier TTL cache
//! - [`Config`] - TOML configuration
//!
//! ```rust,ignore
//! use mnemo_sync::{Config, ConnectivitySignal, Services, SyncContext};
//!
//! let config = Config::load(&config_path)?;
//! mnemo_sync::logging::setup_logging(Some(&config.log_path()));
//! let ctx = SyncContext::open(&config, Services::new(remote, feed, connectivity))?;
//! ctx.start();
//! ctx.writer().create(topic)?;
//! ctx.engine().drain().await;
//! ```

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod engine;
pub mod error;
pub mod handler;
pub mod logging;
pub mod queue;
pub mod realtime;
pub mod remote;
pub mod scheduler;
pub mod subscription;
pub mod writer;

#[cfg(test)]
mod test_helpers;

pub use cache::{cache_key, Cache, CacheConfig, CacheEntry, Cached};
pub use config::{Config, ConfigError};
pub use connectivity::{ConnectivityEvent, ConnectivityObserver, ConnectivitySignal};
pub use context::{Services, SyncContext};
pub use engine::{DrainReport, EngineConfig, ListenerError, SyncEngine};
pub use error::{Error, Result};
pub use handler::{ApplyOutcome, HandlerRegistry, RemoteTableHandler, TableHandler};
pub use queue::{OfflineQueue, QueueError, QueueResult};
pub use realtime::{ChannelHandlers, RealtimeManager};
pub use remote::{
    ChangeEvent, ChangeFeed, ChangeType, ChannelEvent, ChannelSpec, Filter, RemoteError,
    RemoteResult, RemoteStore,
};
pub use scheduler::{Backoff, Scheduler, TimerHandle, TokioScheduler};
pub use subscription::Subscription;
pub use writer::LocalWriter;
