// WebSocket transport over tokio-tungstenite

use super::{Connector, FeedConnection, TransportError, TransportEvent};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

pub struct TungsteniteConnection {
    stream: WsStream,
}

#[async_trait::async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedConnection>, TransportError> {
        let (stream, response) = connect_async(url).await.map_err(|e| TransportError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        debug!(status = %response.status(), "websocket handshake complete");
        Ok(Box::new(TungsteniteConnection { stream }))
    }
}

#[async_trait::async_trait]
impl FeedConnection for TungsteniteConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> TransportEvent {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    trace!(bytes = text.len(), "text frame");
                    return TransportEvent::Text(text);
                }
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return TransportEvent::Text(text),
                    Err(e) => debug!(error = %e, "dropping binary frame that is not UTF-8"),
                },
                Ok(Message::Close(frame)) => {
                    info!(?frame, "feed closed the connection");
                    return TransportEvent::Closed;
                }
                // tungstenite answers pings on its own
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(e) => return TransportEvent::Failed(TransportError::Receive(e.to_string())),
            }
        }
        TransportEvent::Closed
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "close handshake did not complete");
        }
    }
}
