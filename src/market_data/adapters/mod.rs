// Shared traits + events for feed transports

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("failed to send frame: {0}")]
    Send(String),
    #[error("transport failure: {0}")]
    Receive(String),
}

#[derive(Debug)]
pub enum TransportEvent {
    // One complete text payload from the feed
    Text(String),
    // Remote closed or the stream ended
    Closed,
    Failed(TransportError),
}

/// A single open connection to the feed. After `recv` yields `Closed` or `Failed`
/// the connection is spent and must not be polled again.
#[async_trait::async_trait]
pub trait FeedConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    async fn recv(&mut self) -> TransportEvent;
    async fn close(&mut self);
}

/// Opens connections. The handshake has no timeout of its own; failure is whatever
/// the transport reports.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedConnection>, TransportError>;
}

pub mod websocket;

pub use websocket::TungsteniteConnector;
