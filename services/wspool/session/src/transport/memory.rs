//! In-memory transport for development and testing.
//!
//! Every connection is a loopback: frames written are read back, pings are
//! answered with a pong carrying the same payload unless the transport has
//! been made unresponsive. Reachability is a switch
//! shared by all clones, standing in for the node supervisor taking the
//! remote node up and down. `sever_all` resets every open connection the way
//! a peer reset would.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{Connection, Frame, Inbound, Transport};
use crate::endpoint::Endpoint;
use crate::error::SessionError;

#[derive(Debug)]
struct MemoryShared {
    reachable: AtomicBool,
    /// When false, pings go unanswered
    responsive: AtomicBool,
    connect_attempts: AtomicU64,
    connections: AtomicU64,
    closes: AtomicU64,
    /// Bumped by `sever_all`; connections opened under an older value are reset
    generation: watch::Sender<u64>,
}

/// Loopback transport with switchable reachability
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    shared: Arc<MemoryShared>,
}

impl MemoryTransport {
    /// Create a transport whose endpoint is reachable
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            shared: Arc::new(MemoryShared {
                reachable: AtomicBool::new(true),
                responsive: AtomicBool::new(true),
                connect_attempts: AtomicU64::new(0),
                connections: AtomicU64::new(0),
                closes: AtomicU64::new(0),
                generation,
            }),
        }
    }

    /// Create a transport whose endpoint refuses connections
    pub fn unreachable() -> Self {
        let transport = Self::new();
        transport.set_reachable(false);
        transport
    }

    /// Switch whether new connects succeed
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Whether new connects succeed
    pub fn is_reachable(&self) -> bool {
        self.shared.reachable.load(Ordering::SeqCst)
    }

    /// Switch whether open and future connections answer pings
    pub fn set_responsive(&self, responsive: bool) {
        self.shared.responsive.store(responsive, Ordering::SeqCst);
    }

    /// Reset every open connection
    pub fn sever_all(&self) {
        self.shared.generation.send_modify(|generation| *generation += 1);
        debug!("Severed all in-memory connections");
    }

    /// Take the endpoint down: refuse new connects and reset open ones
    pub fn go_down(&self) {
        self.set_reachable(false);
        self.sever_all();
    }

    /// Number of connect calls, successful or not
    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of connections handed out
    pub fn connections(&self) -> u64 {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Number of connections closed explicitly by their owner
    pub fn closes(&self) -> u64 {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, SessionError> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.is_reachable() {
            return Err(SessionError::ConnectFailure(format!(
                "{}: connection refused",
                endpoint
            )));
        }

        self.shared.connections.fetch_add(1, Ordering::SeqCst);
        let generation_rx = self.shared.generation.subscribe();
        let generation = *generation_rx.borrow();
        let (loopback_tx, loopback_rx) = mpsc::unbounded_channel();

        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            loopback_tx,
            loopback_rx,
            generation,
            generation_rx,
            closed: false,
        }))
    }
}

struct MemoryConnection {
    shared: Arc<MemoryShared>,
    loopback_tx: mpsc::UnboundedSender<Inbound>,
    loopback_rx: mpsc::UnboundedReceiver<Inbound>,
    generation: u64,
    generation_rx: watch::Receiver<u64>,
    closed: bool,
}

impl MemoryConnection {
    fn is_severed(&self) -> bool {
        *self.generation_rx.borrow() != self.generation
    }

    fn check_open(&self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Transport("connection closed".to_string()));
        }
        if self.is_severed() {
            return Err(SessionError::Transport("connection reset by peer".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, frame: Frame) -> Result<(), SessionError> {
        self.check_open()?;
        self.loopback_tx
            .send(Inbound::Frame(frame))
            .map_err(|_| SessionError::Transport("loopback closed".to_string()))
    }

    async fn ping(&mut self, payload: Bytes) -> Result<(), SessionError> {
        self.check_open()?;
        if !self.shared.responsive.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.loopback_tx
            .send(Inbound::Pong(payload))
            .map_err(|_| SessionError::Transport("loopback closed".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Inbound, SessionError>> {
        if self.closed {
            return None;
        }
        if self.is_severed() {
            return Some(Err(SessionError::Transport(
                "connection reset by peer".to_string(),
            )));
        }

        tokio::select! {
            biased;

            changed = self.generation_rx.changed() => {
                match changed {
                    Ok(()) => Some(Err(SessionError::Transport(
                        "connection reset by peer".to_string(),
                    ))),
                    // Transport dropped; nothing can reset us any more
                    Err(_) => self.loopback_rx.recv().await.map(Ok),
                }
            }

            inbound = self.loopback_rx.recv() => inbound.map(Ok),
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if !self.closed {
            self.closed = true;
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
