#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Deeply nested uses in sub-modules are falsely flagged as being unused"
)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stream_lifecycle::Config;
use stream_lifecycle::error::{Error, Kind};
use stream_lifecycle::transport::{self, Connector, Events, Payload, Socket, SocketDriver};
use tokio::sync::mpsc;

pub const ENDPOINT: &str = "wss://stream.example.com/ws/ticker";
pub const OTHER_ENDPOINT: &str = "wss://stream.example.com/ws/trades";

/// In-memory connector. Every connection's driver is handed to the test, which plays the
/// transport by hand.
pub struct MockConnector {
    drivers: mpsc::UnboundedSender<SocketDriver>,
    refuse: AtomicBool,
    connections: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SocketDriver>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            drivers: tx,
            refuse: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// Make subsequent `connect` calls fail.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Transports created so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(&self, endpoint: &str) -> stream_lifecycle::Result<(Socket, Events)> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::validation(format!("refusing {endpoint}")));
        }

        let (socket, driver, events) = transport::socket(endpoint);
        self.connections.fetch_add(1, Ordering::SeqCst);
        self.drivers.send(driver).unwrap();
        Ok((socket, events))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Reconnect,
    LostConnection,
    Close(u16),
    Error(Kind),
    Message(Payload),
}

/// Records every callback of the configs it builds, in order.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Recorder {
    pub fn config(&self) -> Config {
        let record = |recorder: &Self| {
            let calls = Arc::clone(&recorder.calls);
            move |call: Call| calls.lock().unwrap().push(call)
        };

        let open = record(self);
        let reconnect = record(self);
        let lost = record(self);
        let close = record(self);
        let error = record(self);
        let message = record(self);

        Config::new()
            .on_open(move || open(Call::Open))
            .on_reconnect(move || reconnect(Call::Reconnect))
            .on_lost_connection(move || lost(Call::LostConnection))
            .on_close(move |event| close(Call::Close(event.code)))
            .on_error(move |e| error(Call::Error(e.kind())))
            .on_message(move |payload| message(Call::Message(payload.clone())))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Drain the recorded calls.
    pub fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

/// Let spawned tasks handle everything queued so far.
///
/// With paused time the clock only advances once every task is idle, so this returns
/// after pending events are dispatched without reaching any reconnection deadline.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
