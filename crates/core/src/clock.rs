// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Wall clock access and time-ordered operation identifiers.
//!
//! Queued operations are identified by an [`OpId`] made of the wall clock
//! time at creation plus a sequence number, so ids sort in creation order
//! even when several operations are created in the same millisecond or the
//! wall clock steps backwards.
//!
//! Format: `{wall_ms}-{seq}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Trait for getting the current wall clock time.
///
/// This allows injecting a controllable clock for testing.
pub trait ClockSource: Send + Sync {
    /// Returns the current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;

    /// Returns the current time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        datetime_from_ms(self.now_ms())
    }
}

/// System clock implementation using `std::time::SystemTime`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

impl<C: ClockSource> ClockSource for &C {
    fn now_ms(&self) -> u64 {
        (*self).now_ms()
    }
}

impl<C: ClockSource + ?Sized> ClockSource for std::sync::Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    time_ms: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at the given time.
    pub fn new(initial_ms: u64) -> Self {
        ManualClock {
            time_ms: AtomicU64::new(initial_ms),
        }
    }

    /// Creates a clock frozen at the given UTC timestamp.
    pub fn at(time: DateTime<Utc>) -> Self {
        Self::new(u64::try_from(time.timestamp_millis()).unwrap_or(0))
    }

    pub fn set(&self, ms: u64) {
        self.time_ms.store(ms, AtomicOrdering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.time_ms.fetch_add(ms, AtomicOrdering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.time_ms.load(AtomicOrdering::SeqCst)
    }
}

/// Converts milliseconds since epoch to a UTC timestamp, clamping out of range values.
pub fn datetime_from_ms(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms).ok().and_then(DateTime::from_timestamp_millis).unwrap_or_default()
}

/// Identifier of a queued operation, ordered by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId {
    /// Wall clock time in milliseconds when the operation was created.
    pub wall_ms: u64,
    /// Sequence number distinguishing ids created in the same millisecond.
    pub seq: u32,
}

impl OpId {
    pub fn new(wall_ms: u64, seq: u32) -> Self {
        OpId { wall_ms, seq }
    }

    /// Parses an id from its string representation.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.wall_ms, self.seq)
    }
}

impl FromStr for OpId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (wall, seq) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidOpId(format!("expected 'wall_ms-seq', got '{s}'")))?;

        let wall_ms = wall
            .parse::<u64>()
            .map_err(|_| Error::InvalidOpId(format!("invalid wall_ms '{wall}' in '{s}'")))?;
        let seq = seq
            .parse::<u32>()
            .map_err(|_| Error::InvalidOpId(format!("invalid seq '{seq}' in '{s}'")))?;

        Ok(OpId::new(wall_ms, seq))
    }
}

// Persisted as an opaque string.
impl Serialize for OpId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OpId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Generates strictly increasing [`OpId`]s from a clock source.
///
/// If the wall clock stalls or goes backwards, the last wall time is kept
/// and the sequence number is bumped instead.
pub struct OpIdGenerator<C: ClockSource = SystemClock> {
    clock: C,
    last: Mutex<OpId>,
}

impl OpIdGenerator<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for OpIdGenerator<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ClockSource> OpIdGenerator<C> {
    pub fn with_clock(clock: C) -> Self {
        OpIdGenerator {
            clock,
            last: Mutex::new(OpId::new(0, 0)),
        }
    }

    /// Resumes after previously issued ids so new ids sort after them.
    pub fn observe(&self, seen: OpId) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if seen > *last {
            *last = seen;
        }
    }

    /// Generates the next id.
    pub fn next_id(&self) -> OpId {
        let physical = self.clock.now_ms();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        let next = if physical > last.wall_ms {
            OpId::new(physical, 0)
        } else {
            OpId::new(last.wall_ms, last.seq.saturating_add(1))
        };
        *last = next;
        next
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
