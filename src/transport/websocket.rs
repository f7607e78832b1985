//! WebSocket transport over tokio-tungstenite

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use super::{Connector, Transport, TransportEvent};
use crate::connection::DisconnectReason;
use crate::error::ConnectionError;

/// Close code used when the peer closed without a status
const CLOSE_NO_STATUS: u16 = 1005;

/// WebSocket stream wrapper implementing Transport
pub struct WsTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
    failed: bool,
}

impl WsTransport {
    pub fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self {
            inner: stream,
            failed: false,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> TransportEvent {
        // An error is always followed by a close, like a browser socket
        if self.failed {
            return TransportEvent::Closed(DisconnectReason::abnormal("transport failed"));
        }

        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Frame(text.as_str().to_owned());
                }
                Some(Ok(Message::Binary(data))) => {
                    return TransportEvent::Frame(String::from_utf8_lossy(&data).into_owned());
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) => {
                            DisconnectReason::clean(u16::from(frame.code), frame.reason.as_str())
                        }
                        None => DisconnectReason::clean(CLOSE_NO_STATUS, ""),
                    };
                    return TransportEvent::Closed(reason);
                }
                // Protocol-level ping/pong is answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.failed = true;
                    return TransportEvent::Error(e.to_string());
                }
                None => {
                    return TransportEvent::Closed(DisconnectReason::abnormal("connection lost"));
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close(None).await {
            debug!(error = %e, "WebSocket close did not complete");
        }
    }
}

/// Connector for `ws://` and `wss://` endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, url: &Url) -> Result<Self::Transport, ConnectionError> {
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        debug!(status = %response.status(), "WebSocket upgrade complete");
        Ok(WsTransport::new(stream))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
