//! Streams Binance mini tickers through the lifecycle manager.
//!
//! Lifecycle events are read off an [`EventBus`]; kill the network to watch the
//! connection get lost and reestablished, and press Ctrl-C to close it intentionally.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example ticker --features tracing
//! ```

use stream_lifecycle::LifecycleManager;
use stream_lifecycle::bus::{EventBus, EventKind};
use stream_lifecycle::transport::Payload;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const ENDPOINT: &str = "wss://stream.binance.com:9443/ws/!miniTicker@arr";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let manager = LifecycleManager::default();
    let bus = EventBus::default();
    let mut events = bus.subscribe();

    if manager.open(ENDPOINT, &bus.config(ENDPOINT)).is_none() {
        anyhow::bail!("unable to open {ENDPOINT}");
    }

    let mut frames = 0_u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(frames, "Shutting down");
                manager.close(ENDPOINT, Some("shutting down"));
            }
            event = events.recv() => match event {
                Ok(event) => match event.kind {
                    EventKind::Opened => info!(endpoint = %event.endpoint, "Connected"),
                    EventKind::Reestablished => info!(endpoint = %event.endpoint, "Reconnected"),
                    EventKind::ConnectionLost => warn!(endpoint = %event.endpoint, "Connection lost"),
                    EventKind::Error { message } => warn!(endpoint = %event.endpoint, %message),
                    EventKind::Message(Payload::Text(text)) => {
                        frames += 1;
                        debug!(bytes = text.len(), frames, "Ticker frame");
                    }
                    EventKind::Closed { code, reason } => {
                        info!(code, %reason, "Closed");
                        if !manager.registry().contains(ENDPOINT) {
                            break;
                        }
                    }
                    _ => {}
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event consumer lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}
