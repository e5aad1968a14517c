//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{Connection, Frame, Inbound, Transport};
use crate::endpoint::Endpoint;
use crate::error::SessionError;

/// Dials `ws://` and `wss://` endpoints
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

impl WsTransport {
    /// Create a WebSocket transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, SessionError> {
        let url = endpoint.url();
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::ConnectFailure(format!("{}: {}", url, e)))?;

        debug!("WebSocket handshake with {} completed ({})", url, response.status());
        Ok(Box::new(WsConnection {
            stream,
            closed: false,
        }))
    }
}

/// Established WebSocket connection
struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

fn transport_error(e: tungstenite::Error) -> SessionError {
    SessionError::Transport(e.to_string())
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: Frame) -> Result<(), SessionError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes.to_vec()),
        };
        self.stream.send(message).await.map_err(transport_error)
    }

    async fn ping(&mut self, payload: Bytes) -> Result<(), SessionError> {
        self.stream
            .send(Message::Ping(payload.to_vec()))
            .await
            .map_err(transport_error)
    }

    async fn recv(&mut self) -> Option<Result<Inbound, SessionError>> {
        if self.closed {
            return None;
        }

        // StreamExt::next on WebSocketStream is cancel safe
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(Inbound::Frame(Frame::Text(text)))),
                Ok(Message::Binary(data)) => {
                    return Some(Ok(Inbound::Frame(Frame::Binary(Bytes::from(data)))))
                }
                Ok(Message::Pong(data)) => return Some(Ok(Inbound::Pong(Bytes::from(data)))),
                // tungstenite queues the pong reply itself
                Ok(Message::Ping(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    debug!("Peer sent close frame: {:?}", frame);
                    return None;
                }
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    return None
                }
                Err(e) => return Some(Err(transport_error(e))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(transport_error(e)),
        }
    }
}
