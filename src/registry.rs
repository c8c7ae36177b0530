//! Per-endpoint connection state.
//!
//! The [`Registry`] is the single source of truth for whether an endpoint is being
//! connected, is open, or is waiting to reconnect. Callers get read-only views; only the
//! [`LifecycleManager`](crate::LifecycleManager) creates, mutates, and removes entries.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::timer::ReconnectTimer;
use crate::transport::Socket;

/// Retry bookkeeping for one endpoint, carried across reconnection attempts.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Reconnection attempts since the last successful open
    pub reconnect_try_count: u32,
    /// Unintentional closes since the last successful open
    pub close_count: u32,
}

impl Counters {
    #[must_use]
    pub const fn new(reconnect_try_count: u32, close_count: u32) -> Self {
        Self {
            reconnect_try_count,
            close_count,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ConnectionState {
    pub(crate) socket: Socket,
    pub(crate) counters: Counters,
    pub(crate) reconnect_timer: Option<ReconnectTimer>,
}

impl ConnectionState {
    pub(crate) fn new(socket: Socket, counters: Counters) -> Self {
        Self {
            socket,
            counters,
            reconnect_timer: None,
        }
    }
}

/// Endpoint-keyed connection states.
///
/// Registries are independent of each other; share one between managers with an
/// [`Arc`](std::sync::Arc).
#[derive(Debug, Default)]
pub struct Registry {
    entries: DashMap<String, ConnectionState>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current socket for `endpoint`, whatever its ready state.
    ///
    /// This includes a closed socket whose endpoint is waiting to reconnect; use
    /// [`is_open`](Self::is_open) to ask whether it is connecting or open.
    #[must_use]
    pub fn get_open(&self, endpoint: &str) -> Option<Socket> {
        self.entries
            .get(endpoint)
            .map(|state| state.socket.clone())
    }

    /// Whether `endpoint` has a socket that is connecting or open.
    #[must_use]
    pub fn is_open(&self, endpoint: &str) -> bool {
        self.entries
            .get(endpoint)
            .is_some_and(|state| state.socket.ready_state().is_alive())
    }

    #[must_use]
    pub fn contains(&self, endpoint: &str) -> bool {
        self.entries.contains_key(endpoint)
    }

    #[must_use]
    pub fn stats(&self, endpoint: &str) -> Option<Counters> {
        self.entries.get(endpoint).map(|state| state.counters)
    }

    /// Whether a reconnection attempt is scheduled for `endpoint`.
    #[must_use]
    pub fn reconnect_pending(&self, endpoint: &str) -> bool {
        self.entries.get(endpoint).is_some_and(|state| {
            state
                .reconnect_timer
                .as_ref()
                .is_some_and(ReconnectTimer::is_pending)
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Locked slot for `endpoint`. Holds the shard lock until dropped.
    pub(crate) fn entry(&self, endpoint: &str) -> Entry<'_, String, ConnectionState> {
        self.entries.entry(endpoint.to_owned())
    }

    pub(crate) fn remove(&self, endpoint: &str) -> Option<ConnectionState> {
        self.entries.remove(endpoint).map(|(_, state)| state)
    }

    /// Apply `f` to the state of `endpoint` if it still belongs to `socket`.
    ///
    /// `f` runs under the shard lock and must not touch the registry.
    pub(crate) fn update<F, R>(&self, endpoint: &str, socket: &Socket, f: F) -> Option<R>
    where
        F: FnOnce(&mut ConnectionState) -> R,
    {
        let mut state = self.entries.get_mut(endpoint)?;
        if state.socket != *socket {
            return None;
        }
        Some(f(&mut state))
    }
}
