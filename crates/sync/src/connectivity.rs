// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Online/offline state and focus signals.
//!
//! The host application owns the platform hooks (network reachability,
//! window focus) and reports them through a [`ConnectivitySignal`]. The sync
//! engine only sees the [`ConnectivityObserver`] trait.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

/// A change reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
    /// The application regained focus.
    FocusGained,
}

/// Read access to connectivity state.
pub trait ConnectivityObserver: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receives every event reported after this call.
    fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent>;
}

/// Connectivity state driven by the host application.
pub struct ConnectivitySignal {
    online: AtomicBool,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivitySignal {
    pub fn new(online: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        ConnectivitySignal {
            online: AtomicBool::new(online),
            events,
        }
    }

    /// Records the current reachability; emits an event only when it changes.
    pub fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::AcqRel) == online {
            return;
        }
        let event = if online { ConnectivityEvent::Online } else { ConnectivityEvent::Offline };
        tracing::debug!(?event, "connectivity changed");
        // No receivers is fine
        let _ = self.events.send(event);
    }

    pub fn focus_gained(&self) {
        let _ = self.events.send(ConnectivityEvent::FocusGained);
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityObserver for ConnectivitySignal {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "connectivity_tests.rs"]
mod tests;
