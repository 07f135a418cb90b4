// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Delayed, cancellable tasks and reconnect backoff.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A unit of deferred work.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs tasks after a delay.
pub trait Scheduler: Send + Sync {
    /// Schedules `task` to run once after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Handle to a scheduled task. Cancelling before the delay elapses skips the task.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn new(token: CancellationToken) -> Self {
        TimerHandle { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token that is cancelled together with this handle.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Scheduler backed by the tokio timer. Must be used inside a runtime.
#[derive(Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::default();
        let token = handle.token();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => task.await,
            }
        });
        handle
    }
}

/// Exponential backoff: `base_delay * 2^attempt` for the first `max_attempts` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            base_delay: Duration::from_millis(5000),
            max_attempts: 5,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (zero-based), or `None` once exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt)?;
        self.base_delay.checked_mul(factor)
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
