//! Client readiness signals.
//!
//! Two flags decide whether calls may be dispatched: network connectivity
//! and whether a credential refresh is outstanding. Both are published
//! through a tokio `watch` channel so the run loop wakes on every change.

use serde::Serialize;
use tokio::sync::watch;

/// Snapshot of the client's readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientState {
    pub online: bool,
    pub refreshing: bool,
}

impl ClientState {
    /// Calls may be dispatched.
    pub fn is_ready(&self) -> bool {
        self.online && !self.refreshing
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            online: true,
            refreshing: false,
        }
    }
}

/// Publisher of [`ClientState`] changes.
#[derive(Debug)]
pub struct ClientSignals {
    tx: watch::Sender<ClientState>,
}

impl Default for ClientSignals {
    fn default() -> Self {
        Self::new(ClientState::default())
    }
}

impl ClientSignals {
    pub fn new(initial: ClientState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> ClientState {
        *self.tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_ready()
    }

    /// Returns a receiver that observes every subsequent change.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.tx.subscribe()
    }

    /// Updates connectivity. Returns true if the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|state| {
            let changed = state.online != online;
            state.online = online;
            changed
        })
    }

    /// Marks a refresh as outstanding.
    ///
    /// Returns false if one was already outstanding, in which case the
    /// caller must not start another.
    pub fn begin_refresh(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if state.refreshing {
                return false;
            }
            state.refreshing = true;
            true
        })
    }

    /// Clears the outstanding refresh. Returns true if one was outstanding.
    pub fn finish_refresh(&self) -> bool {
        self.tx.send_if_modified(|state| {
            let changed = state.refreshing;
            state.refreshing = false;
            changed
        })
    }
}
