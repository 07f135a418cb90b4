// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Two-tier read cache.
//!
//! The memory tier holds recent reads for a few minutes. The persisted tier
//! stores entries in the [`KeyValueStore`] under `cache:`-prefixed keys so
//! reads survive restarts and can back up a failing remote. An expired entry
//! reads as absent, except through [`Cache::get_with_meta`] which reports it
//! as stale.
//!
//! Cache writes never fail the caller: a full store is swept of expired
//! entries and retried once, then the write is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mnemo_core::{ClockSource, KeyValueStore, Table};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::remote::RemoteResult;

/// Key prefix of persisted entries.
pub const PERSISTED_PREFIX: &str = "cache:";

/// Time-to-live settings for both tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub memory_ttl: Duration,
    pub persisted_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            memory_ttl: Duration::from_secs(5 * 60),
            persisted_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// A cached value with its write time and optional expiry, both in ms since epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|at| now_ms >= at)
    }
}

/// A cache read together with its freshness.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub data: T,
    pub is_stale: bool,
}

/// Builds the conventional key for a table-scoped read, e.g. `topics:user:u-1`.
pub fn cache_key(table: Table, scope: &str) -> String {
    format!("{table}:{scope}")
}

/// Whether a key belongs to a table's entries.
fn key_in_table(key: &str, table: Table) -> bool {
    key.strip_prefix(table.as_str()).is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Two-tier cache over an in-memory map and a [`KeyValueStore`].
pub struct Cache {
    memory: Mutex<HashMap<String, CacheEntry<Value>>>,
    persisted: Arc<dyn KeyValueStore>,
    clock: Arc<dyn ClockSource>,
    config: CacheConfig,
}

impl Cache {
    pub fn new(
        persisted: Arc<dyn KeyValueStore>,
        clock: Arc<dyn ClockSource>,
        config: CacheConfig,
    ) -> Self {
        Cache {
            memory: Mutex::new(HashMap::new()),
            persisted,
            clock,
            config,
        }
    }

    fn memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<Value>>> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a fresh value, or `None` if absent, expired or of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (entry, fresh) = self.lookup(key)?;
        if !fresh {
            return None;
        }
        decode(key, entry.data)
    }

    /// Like [`get`](Cache::get) but also returns expired entries, flagged stale.
    pub fn get_with_meta<T: DeserializeOwned>(&self, key: &str) -> Option<Cached<T>> {
        let (entry, fresh) = self.lookup(key)?;
        decode(key, entry.data).map(|data| Cached {
            data,
            is_stale: !fresh,
        })
    }

    /// Finds the best entry for a key: fresh memory, then fresh persisted
    /// (promoted to memory), then the newest expired one.
    fn lookup(&self, key: &str) -> Option<(CacheEntry<Value>, bool)> {
        let now = self.clock.now_ms();

        let in_memory = self.memory().get(key).cloned();
        if let Some(entry) = &in_memory {
            if !entry.is_expired(now) {
                return Some((entry.clone(), true));
            }
        }

        let persisted = self.read_persisted(key);
        if let Some(entry) = &persisted {
            if !entry.is_expired(now) {
                let memory_expiry = now.saturating_add(duration_ms(self.config.memory_ttl));
                let promoted = CacheEntry {
                    data: entry.data.clone(),
                    timestamp: entry.timestamp,
                    expires_at: Some(
                        entry.expires_at.map_or(memory_expiry, |at| at.min(memory_expiry)),
                    ),
                };
                self.memory().insert(key.to_string(), promoted);
                return Some((entry.clone(), true));
            }
        }

        let stale = match (in_memory, persisted) {
            (Some(m), Some(p)) => Some(if p.timestamp > m.timestamp { p } else { m }),
            (m, p) => m.or(p),
        };
        stale.map(|entry| (entry, false))
    }

    fn read_persisted(&self, key: &str) -> Option<CacheEntry<Value>> {
        let raw = match self.persisted.get(&format!("{PERSISTED_PREFIX}{key}")) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::debug!(key, error = %e, "persisted cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(key, error = %e, "ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Stores a value in both tiers.
    ///
    /// An explicit `ttl` applies to both tiers; otherwise each tier uses its
    /// configured default.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(key, error = %e, "value is not cacheable");
                return;
            }
        };
        let now = self.clock.now_ms();
        let expiry =
            |default: Duration| Some(now.saturating_add(duration_ms(ttl.unwrap_or(default))));

        self.memory().insert(
            key.to_string(),
            CacheEntry {
                data: data.clone(),
                timestamp: now,
                expires_at: expiry(self.config.memory_ttl),
            },
        );
        self.write_persisted(
            key,
            &CacheEntry {
                data,
                timestamp: now,
                expires_at: expiry(self.config.persisted_ttl),
            },
        );
    }

    fn write_persisted(&self, key: &str, entry: &CacheEntry<Value>) {
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(key, error = %e, "cache entry not serializable");
                return;
            }
        };
        let storage_key = format!("{PERSISTED_PREFIX}{key}");

        match self.persisted.set(&storage_key, &raw) {
            Ok(()) => {}
            Err(e) if e.is_quota_exceeded() => {
                let swept = self.sweep_persisted();
                tracing::debug!(key, swept, "cache quota exceeded, retrying after sweep");
                if let Err(e) = self.persisted.set(&storage_key, &raw) {
                    tracing::debug!(key, error = %e, "dropping cache write");
                }
            }
            Err(e) => tracing::debug!(key, error = %e, "dropping cache write"),
        }
    }

    /// Removes a key from both tiers.
    pub fn delete(&self, key: &str) {
        self.memory().remove(key);
        if let Err(e) = self.persisted.remove(&format!("{PERSISTED_PREFIX}{key}")) {
            tracing::debug!(key, error = %e, "persisted cache delete failed");
        }
    }

    /// Removes every entry whose key matches `pattern`. Returns how many keys were removed.
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        self.invalidate_where(|key| pattern.is_match(key))
    }

    /// Removes every entry of a table (keys `table` or `table:...`).
    pub fn invalidate_table(&self, table: Table) -> usize {
        self.invalidate_where(|key| key_in_table(key, table))
    }

    fn invalidate_where(&self, matches: impl Fn(&str) -> bool) -> usize {
        let mut removed = 0;
        {
            let mut memory = self.memory();
            let before = memory.len();
            memory.retain(|key, _| !matches(key));
            removed += before - memory.len();
        }

        for storage_key in self.persisted_keys() {
            let Some(key) = storage_key.strip_prefix(PERSISTED_PREFIX) else {
                continue;
            };
            if matches(key) {
                match self.persisted.remove(&storage_key) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::debug!(key, error = %e, "persisted cache delete failed"),
                }
            }
        }
        removed
    }

    fn persisted_keys(&self) -> Vec<String> {
        self.persisted.keys_with_prefix(PERSISTED_PREFIX).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "listing persisted cache failed");
            Vec::new()
        })
    }

    /// Drops expired entries from both tiers. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = {
            let mut memory = self.memory();
            let before = memory.len();
            memory.retain(|_, entry| !entry.is_expired(now));
            before - memory.len()
        };
        removed += self.sweep_persisted();
        if removed > 0 {
            tracing::debug!(removed, "swept expired cache entries");
        }
        removed
    }

    /// Drops expired and unreadable persisted entries.
    fn sweep_persisted(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        for storage_key in self.persisted_keys() {
            let expired = match self.persisted.get(&storage_key) {
                Ok(Some(raw)) => serde_json::from_str::<CacheEntry<Value>>(&raw)
                    .map_or(true, |entry| entry.is_expired(now)),
                Ok(None) => false,
                Err(_) => false,
            };
            if expired && self.persisted.remove(&storage_key).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Serves a fresh cached value, otherwise calls `fetch` and caches its result.
    ///
    /// If `fetch` fails with a retryable error and any cached value exists,
    /// the cached value is returned instead of the error.
    pub async fn fetch_with_fallback<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> RemoteResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        match fetch().await {
            Ok(value) => {
                self.set(key, &value, ttl);
                Ok(value)
            }
            Err(err) if err.is_retryable() => match self.get_with_meta(key) {
                Some(cached) => {
                    tracing::debug!(
                        key,
                        stale = cached.is_stale,
                        error = %err,
                        "serving cached value"
                    );
                    Ok(cached.data)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, data: Value) -> Option<T> {
    match serde_json::from_value(data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(key, error = %e, "cached value has unexpected shape");
            None
        }
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
