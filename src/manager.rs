#![expect(
    clippy::module_name_repetitions,
    reason = "LifecycleManager is re-exported at the crate root"
)]

use std::sync::Arc;

use dashmap::mapref::entry::Entry;

use crate::config::Config;
use crate::error::Error;
use crate::registry::{ConnectionState, Counters, Registry};
use crate::timer::ReconnectTimer;
#[cfg(feature = "ws")]
use crate::transport::ws::WsConnector;
use crate::transport::{
    CloseEvent, Connector, ERROR_CLOSE, Events, INTENTIONAL_CLOSE, Socket, SocketEvent,
};

/// Opens, watches, and reopens endpoint connections.
///
/// Every connection is tracked in a [`Registry`] keyed by endpoint. Unintentional closes
/// are followed by a reconnection attempt after the delay chosen by the endpoint's
/// [`BackoffPolicy`](crate::backoff::BackoffPolicy); closes requested through
/// [`close`](Self::close) end the lifecycle.
///
/// Cloning is cheap and clones share the same registry and connector. All operations
/// must be called from within a Tokio runtime.
pub struct LifecycleManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

struct Inner<C> {
    registry: Arc<Registry>,
    connector: C,
}

impl<C: Connector> Clone for LifecycleManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(feature = "ws")]
impl Default for LifecycleManager<WsConnector> {
    fn default() -> Self {
        Self::new(WsConnector::default())
    }
}

impl<C: Connector> LifecycleManager<C> {
    /// Manager with its own empty registry.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self::with_registry(connector, Arc::new(Registry::new()))
    }

    /// Manager tracking its connections in `registry`.
    #[must_use]
    pub fn with_registry(connector: C, registry: Arc<Registry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                connector,
            }),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    #[must_use]
    pub fn get_open(&self, endpoint: &str) -> Option<Socket> {
        self.inner.registry.get_open(endpoint)
    }

    #[must_use]
    pub fn is_open(&self, endpoint: &str) -> bool {
        self.inner.registry.is_open(endpoint)
    }

    /// Open `endpoint`, or return its socket if it is already connecting or open.
    ///
    /// Returns `None` if the connector cannot start the connection. The error goes to
    /// `on_error` and nothing is left in the registry. All other outcomes are reported
    /// through `config`'s callbacks.
    pub fn open(&self, endpoint: &str, config: &Config) -> Option<Socket> {
        self.open_with(endpoint, config, None)
    }

    /// Open `endpoint` as a reconnection attempt, carrying `counters` into the new state.
    pub fn reopen(&self, endpoint: &str, config: &Config, counters: Counters) -> Option<Socket> {
        self.open_with(endpoint, config, Some(counters))
    }

    /// Intentionally close `endpoint`. See [`close_with_code`](Self::close_with_code).
    pub fn close(&self, endpoint: &str, reason: Option<&str>) -> bool {
        self.close_with_code(endpoint, reason, INTENTIONAL_CLOSE)
    }

    /// Forget `endpoint` and close its socket with `code`.
    ///
    /// The entry is removed before the socket is asked to close, so the close event never
    /// schedules a reconnection. Returns `false` if the endpoint is unknown.
    pub fn close_with_code(&self, endpoint: &str, reason: Option<&str>, code: u16) -> bool {
        let Some(state) = self.inner.registry.remove(endpoint) else {
            return false;
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint, code, reason, "Closing connection");

        state.socket.close(code, reason);
        true
    }

    fn open_with(&self, endpoint: &str, config: &Config, carried: Option<Counters>) -> Option<Socket> {
        let connected = match self.inner.registry.entry(endpoint) {
            Entry::Occupied(entry) if entry.get().socket.ready_state().is_alive() => {
                return Some(entry.get().socket.clone());
            }
            Entry::Occupied(mut entry) => {
                // Waiting to reconnect: the new socket takes over the entry and the
                // pending timer is dropped with the old state. A manual open starts over.
                let counters = carried.unwrap_or_default();
                match self.inner.connector.connect(endpoint) {
                    Ok((socket, events)) => {
                        entry.insert(ConnectionState::new(socket.clone(), counters));
                        Ok((socket, events))
                    }
                    Err(e) => {
                        entry.remove();
                        Err(e)
                    }
                }
            }
            Entry::Vacant(entry) => {
                let counters = carried.unwrap_or_default();
                self.inner
                    .connector
                    .connect(endpoint)
                    .map(|(socket, events)| {
                        entry.insert(ConnectionState::new(socket.clone(), counters));
                        (socket, events)
                    })
            }
        };

        match connected {
            Ok((socket, events)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(endpoint, socket = socket.id(), "Connecting");

                self.listen(endpoint, socket.clone(), events, config.clone());
                Some(socket)
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(endpoint, error = %e, "Unable to open connection");

                config.emit_error(&e);
                None
            }
        }
    }

    /// Dispatch the events of `socket` in order until it closes.
    fn listen(&self, endpoint: &str, socket: Socket, mut events: Events, config: Config) {
        let manager = self.clone();
        let endpoint = endpoint.to_owned();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let closed = matches!(event, SocketEvent::Close(_));
                manager.dispatch(&endpoint, &socket, &config, event);
                if closed {
                    break;
                }
            }
        });
    }

    fn dispatch(&self, endpoint: &str, socket: &Socket, config: &Config, event: SocketEvent) {
        match event {
            SocketEvent::Open => self.handle_open(endpoint, socket, config),
            SocketEvent::Message(payload) => config.emit_message(&payload),
            SocketEvent::Error(error) => Self::handle_error(endpoint, socket, config, &error),
            SocketEvent::Close(event) => self.handle_close(endpoint, socket, config, &event),
        }
    }

    fn handle_open(&self, endpoint: &str, socket: &Socket, config: &Config) {
        let recovered = self.inner.registry.update(endpoint, socket, |state| {
            state.reconnect_timer = None;
            state.counters.reconnect_try_count = 0;
            let recovered = state.counters.close_count > 0;
            state.counters.close_count = 0;
            recovered
        });

        match recovered {
            Some(true) => {
                #[cfg(feature = "tracing")]
                tracing::info!(endpoint, "Connection reestablished");
                config.emit_reconnect();
            }
            Some(false) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(endpoint, "Connection open");
                config.emit_open();
            }
            None => {
                // Closed or replaced while the handshake was in flight
                #[cfg(feature = "tracing")]
                tracing::debug!(endpoint, socket = socket.id(), "Ignoring open of untracked socket");
            }
        }
    }

    fn handle_error(endpoint: &str, socket: &Socket, config: &Config, error: &Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(endpoint, error = %error, "Transport error, closing connection");
        #[cfg(not(feature = "tracing"))]
        let _ = &endpoint;

        config.emit_error(error);
        socket.close(ERROR_CLOSE, Some("transport error"));
    }

    fn handle_close(&self, endpoint: &str, socket: &Socket, config: &Config, event: &CloseEvent) {
        let registry = &self.inner.registry;

        if !event.is_intentional() {
            registry.update(endpoint, socket, |state| {
                state.counters.close_count = state.counters.close_count.saturating_add(1);
            });
            #[cfg(feature = "tracing")]
            tracing::warn!(endpoint, code = event.code, reason = %event.reason, "Connection lost");
            config.emit_lost_connection();
        }

        let current = registry.get_open(endpoint);
        if current.as_ref().is_some_and(|current| current != socket) {
            return;
        }

        config.emit_close(event);

        let Some(try_count) = registry.update(endpoint, socket, |state| {
            state.counters.reconnect_try_count
        }) else {
            #[cfg(feature = "tracing")]
            tracing::debug!(endpoint, code = event.code, "Connection closed");
            return;
        };

        let delay = config.delay(try_count);

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint, ?delay, attempt = try_count.saturating_add(1), "Scheduling reconnect");

        let timer = {
            let manager = self.clone();
            let endpoint = endpoint.to_owned();
            let socket = socket.clone();
            let config = config.clone();
            ReconnectTimer::schedule(delay, move || {
                manager.reconnect(&endpoint, &socket, &config);
            })
        };

        // Dropping the timer cancels it if the entry went away in the meantime
        registry.update(endpoint, socket, |state| state.reconnect_timer = Some(timer));
    }

    /// Timer callback: reopen `endpoint` if `socket` still owns its entry.
    fn reconnect(&self, endpoint: &str, socket: &Socket, config: &Config) {
        let carried = self.inner.registry.update(endpoint, socket, |state| {
            state.reconnect_timer = None;
            state.counters.reconnect_try_count = state.counters.reconnect_try_count.saturating_add(1);
            state.counters
        });

        if let Some(counters) = carried {
            #[cfg(feature = "tracing")]
            tracing::info!(endpoint, attempt = counters.reconnect_try_count, "Reconnecting");

            _ = self.reopen(endpoint, config, counters);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::transport::{self, SocketDriver, TransportError};

    const ENDPOINT: &str = "wss://stream.example.com/ws";

    #[derive(Default)]
    struct Scripted {
        drivers: Mutex<Vec<SocketDriver>>,
        refuse: AtomicBool,
    }

    impl Connector for Scripted {
        fn connect(&self, endpoint: &str) -> crate::Result<(Socket, Events)> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionClosed.into());
            }
            let (socket, driver, events) = transport::socket(endpoint);
            self.drivers.lock().unwrap().push(driver);
            Ok((socket, events))
        }
    }

    #[tokio::test]
    async fn open_is_idempotent_while_connecting() {
        let connector = Arc::new(Scripted::default());
        let manager = LifecycleManager::new(Arc::clone(&connector));

        let first = manager.open(ENDPOINT, &Config::new()).unwrap();
        let second = manager.open(ENDPOINT, &Config::new()).unwrap();

        assert_eq!(first, second);
        assert_eq!(connector.drivers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_open_leaves_no_entry() {
        let connector = Arc::new(Scripted::default());
        connector.refuse.store(true, Ordering::SeqCst);
        let manager = LifecycleManager::new(Arc::clone(&connector));

        assert!(manager.open(ENDPOINT, &Config::new()).is_none());
        assert!(!manager.registry().contains(ENDPOINT));
    }

    #[tokio::test]
    async fn failed_reopen_removes_stale_entry() {
        let connector = Arc::new(Scripted::default());
        let manager = LifecycleManager::new(Arc::clone(&connector));

        let socket = manager.open(ENDPOINT, &Config::new()).unwrap();
        connector.drivers.lock().unwrap()[0].closed(CloseEvent::abnormal());
        assert!(!socket.ready_state().is_alive());

        connector.refuse.store(true, Ordering::SeqCst);
        assert!(manager.reopen(ENDPOINT, &Config::new(), Counters::new(1, 1)).is_none());
        assert!(!manager.registry().contains(ENDPOINT));
    }

    #[tokio::test]
    async fn reopen_carries_counters() {
        let connector = Arc::new(Scripted::default());
        let manager = LifecycleManager::new(Arc::clone(&connector));

        manager.reopen(ENDPOINT, &Config::new(), Counters::new(4, 2)).unwrap();

        assert_eq!(manager.registry().stats(ENDPOINT), Some(Counters::new(4, 2)));
    }

    #[tokio::test]
    async fn close_unknown_endpoint_returns_false() {
        let manager = LifecycleManager::new(Scripted::default());

        assert!(!manager.close(ENDPOINT, None));
        assert!(manager.registry().is_empty());
    }
}
