use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::{BackoffPolicy, Staircase};
use crate::error::Error;
use crate::transport::{CloseEvent, Payload};

type Callback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;
type CloseCallback = Arc<dyn Fn(&CloseEvent) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Lifecycle callbacks and reconnection policy for one endpoint.
///
/// A `Config` is passed to [`open`](crate::LifecycleManager::open) and carried unchanged
/// across every reconnection attempt. Clones share the same callbacks. Callbacks run on
/// the connection's dispatch task and must not block or panic.
///
/// ```
/// use std::time::Duration;
///
/// use stream_lifecycle::Config;
///
/// let config = Config::new()
///     .reconnect_delay(|_try_count: u32| Duration::from_secs(1))
///     .on_open(|| println!("connected"))
///     .on_message(|payload| println!("{payload:?}"));
///
/// assert!(config.has_on_open());
/// assert!(!config.has_on_close());
/// ```
#[derive(Clone)]
pub struct Config {
    reconnect_delay: Arc<dyn BackoffPolicy>,
    on_open: Option<Callback>,
    on_reconnect: Option<Callback>,
    on_lost_connection: Option<Callback>,
    on_close: Option<CloseCallback>,
    on_error: Option<ErrorCallback>,
    on_message: Option<MessageCallback>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect_delay: Arc::new(Staircase::default()),
            on_open: None,
            on_reconnect: None,
            on_lost_connection: None,
            on_close: None,
            on_error: None,
            on_message: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("on_open", &self.on_open.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .field("on_lost_connection", &self.on_lost_connection.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish_non_exhaustive()
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default [`Staircase`] policy.
    #[must_use]
    pub fn reconnect_delay<P: BackoffPolicy>(mut self, policy: P) -> Self {
        self.reconnect_delay = Arc::new(policy);
        self
    }

    /// Called when a connection opens with no unintentional close since the last open.
    #[must_use]
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Called when a connection opens after one or more unintentional closes.
    #[must_use]
    pub fn on_reconnect<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_reconnect = Some(Arc::new(f));
        self
    }

    /// Called for every close whose code is not the intentional one.
    #[must_use]
    pub fn on_lost_connection<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_lost_connection = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&CloseEvent) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Called for construction failures and transport errors.
    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn has_on_open(&self) -> bool {
        self.on_open.is_some()
    }

    #[must_use]
    pub fn has_on_close(&self) -> bool {
        self.on_close.is_some()
    }

    pub(crate) fn delay(&self, try_count: u32) -> Duration {
        self.reconnect_delay.delay(try_count)
    }

    pub(crate) fn emit_open(&self) {
        if let Some(f) = &self.on_open {
            f();
        }
    }

    pub(crate) fn emit_reconnect(&self) {
        if let Some(f) = &self.on_reconnect {
            f();
        }
    }

    pub(crate) fn emit_lost_connection(&self) {
        if let Some(f) = &self.on_lost_connection {
            f();
        }
    }

    pub(crate) fn emit_close(&self, event: &CloseEvent) {
        if let Some(f) = &self.on_close {
            f(event);
        }
    }

    pub(crate) fn emit_error(&self, error: &Error) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }

    pub(crate) fn emit_message(&self, payload: &Payload) {
        if let Some(f) = &self.on_message {
            f(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn default_uses_staircase() {
        let config = Config::default();

        assert_eq!(config.delay(0), Duration::from_secs(3));
        assert_eq!(config.delay(5), Duration::from_secs(10));
        assert_eq!(config.delay(50), Duration::from_secs(20));
    }

    #[test]
    fn custom_policy_replaces_default() {
        let config = Config::new().reconnect_delay(|try_count: u32| {
            Duration::from_millis(u64::from(try_count) * 100)
        });

        assert_eq!(config.delay(0), Duration::ZERO);
        assert_eq!(config.delay(4), Duration::from_millis(400));
    }

    #[test]
    fn unset_callbacks_are_skipped() {
        let config = Config::new();

        config.emit_open();
        config.emit_reconnect();
        config.emit_lost_connection();
        config.emit_close(&CloseEvent::abnormal());
        config.emit_error(&Error::validation("boom"));
        config.emit_message(&Payload::from("tick"));
    }

    #[test]
    fn clones_share_callbacks() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let config = Config::new().on_open(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        config.emit_open();
        config.clone().emit_open();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn debug_lists_configured_callbacks() {
        let config = Config::new().on_close(|_| {});
        let debug = format!("{config:?}");

        assert!(debug.contains("on_close: true"), "{debug}");
        assert!(debug.contains("on_open: false"), "{debug}");
    }
}
