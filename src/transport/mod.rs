//! Transport handles and the connector seam.
//!
//! A physical connection is split in two halves created together by [`socket`]:
//!
//! - [`Socket`]: the handle given to callers and stored in the registry. It exposes the
//!   ready state and issues [`Command`]s (send, close).
//! - [`SocketDriver`]: the transport side. It consumes commands and reports what happened
//!   on the wire as [`SocketEvent`]s, keeping the shared ready state in step.
//!
//! A [`Connector`] builds these pairs. The default one, [`ws::WsConnector`], drives a
//! WebSocket connection on a Tokio task; tests can hand the driver to a script instead.

pub mod error;
#[cfg(feature = "ws")]
pub mod ws;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use tokio::sync::mpsc;

pub use error::TransportError;

use crate::Result;
use crate::error::Error;

/// Close code reserved for closes requested by the caller. Suppresses reconnection.
pub const INTENTIONAL_CLOSE: u16 = 1000;
/// Close code reported when a connection ends without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;
/// Close code used when a transport error forces the connection shut.
pub const ERROR_CLOSE: u16 = 4000;

/// Receiving half of a socket's event stream.
pub type Events = mpsc::UnboundedReceiver<SocketEvent>;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Ready state of a socket, mirroring the classic WebSocket states.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    /// Whether the socket is connecting or open.
    #[must_use]
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Opaque message payload.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Details of a finished connection.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    /// Whether the close handshake completed
    pub was_clean: bool,
}

impl CloseEvent {
    #[must_use]
    pub fn new<S: Into<String>>(code: u16, reason: S, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }

    /// Connection dropped without a close frame.
    #[must_use]
    pub fn abnormal() -> Self {
        Self::new(ABNORMAL_CLOSE, String::new(), false)
    }

    #[must_use]
    pub const fn is_intentional(&self) -> bool {
        self.code == INTENTIONAL_CLOSE
    }
}

/// Something that happened on the wire.
#[non_exhaustive]
#[derive(Debug)]
pub enum SocketEvent {
    Open,
    Message(Payload),
    Error(Error),
    Close(CloseEvent),
}

/// Request from a [`Socket`] to its driver.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(Payload),
    Close { code: u16, reason: String },
}

#[derive(Debug)]
struct Shared {
    id: u64,
    endpoint: String,
    state: AtomicU8,
}

impl Shared {
    fn state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `next` if `allowed` holds for the current state, returning the previous
    /// state on success.
    fn transition(&self, allowed: fn(ReadyState) -> bool, next: ReadyState) -> Option<ReadyState> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                allowed(ReadyState::from_u8(current)).then_some(next.as_u8())
            })
            .ok()
            .map(ReadyState::from_u8)
    }
}

/// Handle to one physical connection.
///
/// Cloning is cheap and every clone refers to the same connection. Two sockets are equal
/// when they are handles to the same connection.
#[derive(Clone)]
pub struct Socket {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.shared.id)
            .field("endpoint", &self.shared.endpoint)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for Socket {}

impl Socket {
    /// Process-unique identifier of this connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    /// Queue a payload for sending. Fails unless the socket is open.
    pub fn send<P: Into<Payload>>(&self, payload: P) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen.into());
        }

        self.commands
            .send(Command::Send(payload.into()))
            .map_err(|_e| TransportError::ConnectionClosed)?;
        Ok(())
    }

    /// Ask the transport to close with `code`.
    ///
    /// Returns `false` if the socket was already closing or closed, in which case nothing
    /// is sent. The outcome arrives later as a [`SocketEvent::Close`].
    pub fn close(&self, code: u16, reason: Option<&str>) -> bool {
        if self
            .shared
            .transition(ReadyState::is_alive, ReadyState::Closing)
            .is_none()
        {
            return false;
        }

        _ = self.commands.send(Command::Close {
            code,
            reason: reason.unwrap_or_default().to_owned(),
        });
        true
    }
}

/// Transport side of a [`Socket`].
///
/// Every report method updates the shared ready state before queueing its event, so the
/// state a handler observes is never behind the event it is handling. Dropping the driver
/// before [`closed`](Self::closed) reports an [`ABNORMAL_CLOSE`].
#[derive(Debug)]
pub struct SocketDriver {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl SocketDriver {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    /// Wait for the next command. Returns `None` once every [`Socket`] handle is gone.
    pub async fn next_command(&mut self) -> Option<Command> {
        self.commands.recv().await
    }

    pub fn try_next_command(&mut self) -> Option<Command> {
        self.commands.try_recv().ok()
    }

    /// Wait for a close request, discarding queued sends.
    pub async fn next_close(&mut self) -> Option<(u16, String)> {
        loop {
            match self.commands.recv().await? {
                Command::Close { code, reason } => return Some((code, reason)),
                Command::Send(_) => {}
            }
        }
    }

    /// Report a completed handshake. Returns `false` if a close was requested first.
    pub fn opened(&self) -> bool {
        let opened = self
            .shared
            .transition(|state| state == ReadyState::Connecting, ReadyState::Open)
            .is_some();
        if opened {
            self.emit(SocketEvent::Open);
        }
        opened
    }

    pub fn received(&self, payload: Payload) {
        if self.ready_state() == ReadyState::Open {
            self.emit(SocketEvent::Message(payload));
        }
    }

    pub fn failed<E: Into<Error>>(&self, error: E) {
        if self.ready_state() != ReadyState::Closed {
            self.emit(SocketEvent::Error(error.into()));
        }
    }

    /// Report the end of the connection. Only the first report is delivered.
    pub fn closed(&self, event: CloseEvent) -> bool {
        let previous = ReadyState::from_u8(
            self.shared
                .state
                .swap(ReadyState::Closed.as_u8(), Ordering::AcqRel),
        );
        if previous == ReadyState::Closed {
            return false;
        }

        self.emit(SocketEvent::Close(event));
        true
    }

    fn emit(&self, event: SocketEvent) {
        // The receiver is gone once nobody listens to this connection any more
        _ = self.events.send(event);
    }
}

impl Drop for SocketDriver {
    /// A transport that goes away without reporting a close has dropped the connection.
    fn drop(&mut self) {
        self.closed(CloseEvent::abnormal());
    }
}

/// Create the two halves of a new connection to `endpoint`, plus its event stream.
#[must_use]
pub fn socket(endpoint: &str) -> (Socket, SocketDriver, Events) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
        endpoint: endpoint.to_owned(),
        state: AtomicU8::new(ReadyState::Connecting.as_u8()),
    });

    let socket = Socket {
        shared: Arc::clone(&shared),
        commands: commands_tx,
    };
    let driver = SocketDriver {
        shared,
        commands: commands_rx,
        events: events_tx,
    };

    (socket, driver, events_rx)
}

/// Builds transport connections.
///
/// `connect` must not block: it only validates the endpoint and starts the connection
/// attempt, whose outcome arrives on the returned [`Events`]. An `Err` means the
/// connection could not even be started.
///
/// `connect` runs while the registry holds the endpoint's shard lock, so it must not call
/// back into the [`Registry`](crate::Registry) or the manager that owns it.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, endpoint: &str) -> Result<(Socket, Events)>;
}

impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn connect(&self, endpoint: &str) -> Result<(Socket, Events)> {
        (**self).connect(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_socket_is_connecting() {
        let (socket, driver, _events) = socket("wss://example.com/stream");

        assert_eq!(socket.ready_state(), ReadyState::Connecting);
        assert_eq!(socket.id(), driver.id());
        assert_eq!(socket.endpoint(), "wss://example.com/stream");
    }

    #[test]
    fn socket_ids_are_unique() {
        let (first, _, _) = socket("wss://example.com");
        let (second, _, _) = socket("wss://example.com");

        assert_ne!(first, second);
        assert_eq!(first, first.clone());
    }

    #[test]
    fn send_requires_open() {
        let (socket, mut driver, mut events) = socket("wss://example.com");

        let error = socket.send("hello").unwrap_err();
        assert_eq!(error.kind(), crate::error::Kind::Transport);

        assert!(driver.opened(), "handshake should open a connecting socket");
        assert!(matches!(events.try_recv(), Ok(SocketEvent::Open)));

        socket.send("hello").unwrap();
        assert_eq!(
            driver.try_next_command(),
            Some(Command::Send(Payload::Text("hello".to_owned())))
        );
    }

    #[test]
    fn close_is_sent_once() {
        let (socket, mut driver, _events) = socket("wss://example.com");

        assert!(socket.close(INTENTIONAL_CLOSE, Some("bye")), "first close");
        assert!(!socket.close(ERROR_CLOSE, None), "second close is a no-op");
        assert_eq!(socket.ready_state(), ReadyState::Closing);

        assert_eq!(
            driver.try_next_command(),
            Some(Command::Close {
                code: INTENTIONAL_CLOSE,
                reason: "bye".to_owned()
            })
        );
        assert_eq!(driver.try_next_command(), None);
    }

    #[test]
    fn open_after_close_request_is_refused() {
        let (socket, driver, mut events) = socket("wss://example.com");

        socket.close(INTENTIONAL_CLOSE, None);

        assert!(!driver.opened(), "closing socket must not open");
        assert!(events.try_recv().is_err(), "no open event expected");
    }

    #[test]
    fn only_first_close_is_reported() {
        let (socket, driver, mut events) = socket("wss://example.com");

        assert!(driver.closed(CloseEvent::abnormal()), "first close");
        assert!(!driver.closed(CloseEvent::abnormal()), "second close");
        assert_eq!(socket.ready_state(), ReadyState::Closed);

        driver.received(Payload::Text("late".to_owned()));
        driver.failed(TransportError::ConnectionClosed);

        assert!(matches!(events.try_recv(), Ok(SocketEvent::Close(event)) if event.code == ABNORMAL_CLOSE));
        assert!(events.try_recv().is_err(), "nothing is reported after close");
    }

    #[test]
    fn dropped_driver_reports_abnormal_close() {
        let (socket, driver, mut events) = socket("wss://example.com");
        driver.opened();
        drop(driver);

        assert_eq!(socket.ready_state(), ReadyState::Closed);
        assert!(matches!(events.try_recv(), Ok(SocketEvent::Open)));
        assert!(matches!(events.try_recv(), Ok(SocketEvent::Close(event)) if event.code == ABNORMAL_CLOSE));
    }

    #[test]
    fn dropping_a_closed_driver_reports_nothing() {
        let (_socket, driver, mut events) = socket("wss://example.com");
        driver.closed(CloseEvent::new(INTENTIONAL_CLOSE, "", true));
        drop(driver);

        assert!(matches!(events.try_recv(), Ok(SocketEvent::Close(event)) if event.code == INTENTIONAL_CLOSE));
        assert!(events.try_recv().is_err(), "close is reported once");
    }
}
