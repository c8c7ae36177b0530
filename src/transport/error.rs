#![expect(
    clippy::module_name_repetitions,
    reason = "TransportError includes module name for clarity when used outside this module"
)]

use std::error::Error as StdError;
use std::fmt;

use crate::error::{Error, Kind};

/// Transport error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportError {
    /// Error connecting to or communicating with the WebSocket server
    #[cfg(feature = "ws")]
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Endpoint uses a scheme the connector cannot speak
    UnsupportedScheme(String),
    /// Operation needs an open connection
    NotOpen,
    /// The connection is gone
    ConnectionClosed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "ws")]
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::UnsupportedScheme(scheme) => {
                write!(f, "unsupported endpoint scheme `{scheme}`, expected ws or wss")
            }
            Self::NotOpen => write!(f, "connection is not open"),
            Self::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            #[cfg(feature = "ws")]
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        let kind = match e {
            TransportError::UnsupportedScheme(_) => Kind::Validation,
            _ => Kind::Transport,
        };
        Error::with_source(kind, e)
    }
}

#[cfg(feature = "ws")]
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::with_source(Kind::Transport, TransportError::Connection(e))
    }
}
