//! Fan-out of lifecycle callbacks to any number of subscribers.
//!
//! [`EventBus::config`] builds a [`Config`] whose callbacks publish [`LifecycleEvent`]s,
//! so UI or logging code can listen without being wired into every `open` call.

#![expect(
    clippy::module_name_repetitions,
    reason = "EventBus is the conventional name for this type"
)]

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::transport::Payload;

const BROADCAST_CAPACITY: usize = 1024;

/// What happened to an endpoint.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Opened,
    Reestablished,
    ConnectionLost,
    Closed { code: u16, reason: String },
    Error { message: String },
    Message(Payload),
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub endpoint: Arc<str>,
    pub kind: EventKind,
}

/// Broadcast bus of [`LifecycleEvent`]s.
///
/// Subscribers that fall more than the bus capacity behind miss the oldest events and
/// see [`broadcast::error::RecvError::Lagged`].
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}

impl EventBus {
    /// Bus retaining up to `capacity` undelivered events per subscriber (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish `event`, returning how many subscribers will see it.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        // No subscribers is fine
        self.tx.send(event).unwrap_or(0)
    }

    /// A [`Config`] publishing every lifecycle callback of `endpoint` onto this bus.
    ///
    /// The returned config uses the default backoff policy; chain
    /// [`Config::reconnect_delay`] to change it.
    #[must_use]
    pub fn config(&self, endpoint: &str) -> Config {
        let publisher = Publisher {
            bus: self.clone(),
            endpoint: Arc::from(endpoint),
        };

        Config::new()
            .on_open({
                let publisher = publisher.clone();
                move || publisher.emit(EventKind::Opened)
            })
            .on_reconnect({
                let publisher = publisher.clone();
                move || publisher.emit(EventKind::Reestablished)
            })
            .on_lost_connection({
                let publisher = publisher.clone();
                move || publisher.emit(EventKind::ConnectionLost)
            })
            .on_close({
                let publisher = publisher.clone();
                move |event| {
                    publisher.emit(EventKind::Closed {
                        code: event.code,
                        reason: event.reason.clone(),
                    });
                }
            })
            .on_error({
                let publisher = publisher.clone();
                move |error| {
                    publisher.emit(EventKind::Error {
                        message: error.to_string(),
                    });
                }
            })
            .on_message(move |payload| publisher.emit(EventKind::Message(payload.clone())))
    }
}

#[derive(Clone)]
struct Publisher {
    bus: EventBus,
    endpoint: Arc<str>,
}

impl Publisher {
    fn emit(&self, kind: EventKind) {
        self.bus.publish(LifecycleEvent {
            endpoint: Arc::clone(&self.endpoint),
            kind,
        });
    }
}
