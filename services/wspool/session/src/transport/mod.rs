//! Transport seam for sessions.
//!
//! A `Transport` dials an endpoint and yields a `Connection`; the session
//! driver owns the connection and never looks past these traits. Two
//! implementations ship with the crate:
//!
//! - `WsTransport`: WebSocket client over `tokio-tungstenite`
//! - `MemoryTransport`: loopback connections with switchable reachability,
//!   for development and tests

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use crate::endpoint::Endpoint;
use crate::error::SessionError;

pub mod memory;
pub mod ws;

pub use memory::MemoryTransport;
pub use ws::WsTransport;

/// Application frame carried by a session (payload is opaque to the pool)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame, the usual carrier for JSON-RPC
    Text(String),
    /// Binary frame
    Binary(Bytes),
}

impl Frame {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Frame::Binary(bytes)
    }
}

/// Something read from a connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Application frame
    Frame(Frame),
    /// Keepalive reply carrying the payload of the matching ping
    Pong(Bytes),
}

/// Dials endpoints
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Establish a connection; errors are connect failures
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, SessionError>;
}

/// An established duplex connection
#[async_trait]
pub trait Connection: Send {
    /// Write one frame
    async fn send(&mut self, frame: Frame) -> Result<(), SessionError>;

    /// Write a keepalive ping with the given payload
    async fn ping(&mut self, payload: Bytes) -> Result<(), SessionError>;

    /// Next inbound item; `None` once the peer has closed. Must be cancel safe.
    async fn recv(&mut self) -> Option<Result<Inbound, SessionError>>;

    /// Close the connection. Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), SessionError>;
}
