//! WebSocket connector backed by `tokio-tungstenite`.

#![expect(
    clippy::module_name_repetitions,
    reason = "WsConnector names the transport it connects"
)]

use std::time::Duration;

use futures::{SinkExt as _, Stream, StreamExt as _};
use tokio::runtime::Handle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::{CloseEvent, Command, Connector, Events, Payload, Socket, SocketDriver, TransportError};
use crate::Result;
use crate::error::Error;

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Code reported when the peer's close frame carries no status.
const NO_STATUS_CLOSE: u16 = 1005;

/// Configuration for the WebSocket transport.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long to wait for the peer's close reply, and for a close request after the
    /// transport fails, before reporting the connection as closed
    pub close_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Opens `ws://` and `wss://` endpoints, each driven by its own Tokio task.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    config: TransportConfig,
}

impl WsConnector {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl Connector for WsConnector {
    fn connect(&self, endpoint: &str) -> Result<(Socket, Events)> {
        let url = Url::parse(endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::UnsupportedScheme(url.scheme().to_owned()).into());
        }
        let runtime = Handle::try_current()?;

        let (socket, driver, events) = super::socket(endpoint);
        runtime.spawn(drive(url, driver, self.config.clone()));

        Ok((socket, events))
    }
}

/// Runs one connection from handshake to close.
async fn drive(url: Url, mut driver: SocketDriver, config: TransportConfig) {
    let handshake = connect_async(url.as_str());
    tokio::pin!(handshake);

    let stream = loop {
        tokio::select! {
            result = &mut handshake => match result {
                Ok((stream, _)) => break stream,
                Err(e) => {
                    fail(&mut driver, e.into(), config.close_timeout).await;
                    return;
                }
            },
            command = driver.next_command() => match command {
                Some(Command::Close { code, reason }) => {
                    driver.closed(CloseEvent::new(code, reason, false));
                    return;
                }
                Some(_) => {}
                None => return,
            },
        }
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(endpoint = driver.endpoint(), "WebSocket handshake complete");

    // A refused open leaves the pending close request queued for the loop below
    driver.opened();

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%text, "Received WebSocket text message");
                    driver.received(Payload::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    driver.received(Payload::Binary(bytes.to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    // Flushes the close reply tungstenite queued for the peer
                    _ = write.close().await;
                    let event = frame.map_or_else(
                        || CloseEvent::new(NO_STATUS_CLOSE, String::new(), true),
                        |frame| CloseEvent::new(u16::from(frame.code), frame.reason.as_str(), true),
                    );
                    driver.closed(event);
                    return;
                }
                Some(Ok(_)) => {
                    // Ping/pong and raw frames are handled by tungstenite
                }
                Some(Err(e)) => {
                    fail(&mut driver, e.into(), config.close_timeout).await;
                    return;
                }
                None => {
                    driver.closed(CloseEvent::abnormal());
                    return;
                }
            },

            command = driver.next_command() => match command {
                Some(Command::Send(payload)) => {
                    if let Err(e) = write.send(into_message(payload)).await {
                        fail(&mut driver, e.into(), config.close_timeout).await;
                        return;
                    }
                }
                Some(Command::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let sent = write.send(Message::Close(Some(frame))).await.is_ok();
                    let clean = sent
                        && timeout(config.close_timeout, close_reply(&mut read))
                            .await
                            .is_ok_and(|replied| replied);
                    driver.closed(CloseEvent::new(code, reason, clean));
                    return;
                }
                None => {
                    // Every handle is gone; nobody is left to observe the close
                    _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
        }
    }
}

/// Report `error`, then give the manager `close_timeout` to request the close whose code
/// the close event will carry.
async fn fail(driver: &mut SocketDriver, error: Error, close_timeout: Duration) {
    driver.failed(error);

    let event = match timeout(close_timeout, driver.next_close()).await {
        Ok(Some((code, reason))) => CloseEvent::new(code, reason, false),
        _ => CloseEvent::abnormal(),
    };
    driver.closed(event);
}

/// Drain frames until the peer answers our close frame.
async fn close_reply<S>(read: &mut S) -> bool
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(Ok(frame)) = read.next().await {
        if frame.is_close() {
            return true;
        }
    }
    false
}

fn into_message(payload: Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.into()),
        Payload::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;

    #[test]
    fn rejects_unparseable_endpoint() {
        let error = WsConnector::default().connect("not a url").unwrap_err();

        assert_eq!(error.kind(), Kind::Validation);
    }

    #[test]
    fn rejects_non_websocket_scheme() {
        let error = WsConnector::default()
            .connect("https://stream.example.com")
            .unwrap_err();

        assert!(
            matches!(
                error.downcast_ref::<TransportError>(),
                Some(TransportError::UnsupportedScheme(scheme)) if scheme == "https"
            ),
            "unexpected error: {error}"
        );
    }

    #[test]
    fn requires_a_runtime() {
        let error = WsConnector::default()
            .connect("ws://127.0.0.1:9")
            .unwrap_err();

        assert_eq!(error.kind(), Kind::Internal);
    }

    #[test]
    fn default_close_timeout_is_five_seconds() {
        assert_eq!(TransportConfig::default().close_timeout, Duration::from_secs(5));
    }
}
