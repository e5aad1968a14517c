//! WebSocket sessions with a health state machine, keepalive and bounded reconnect.
//!
//! This crate provides the session layer for wspool: one `Session` per duplex
//! connection to a remote node, driven by its own task. A session detects a
//! dead connection (peer reset, close, keepalive silence), retries within a
//! reconnect budget, and retires itself as `Dead` when the budget runs out.
//!
//! ## Features
//!
//! - **Endpoints**: normalized `ws://` / `wss://` addresses
//! - **Transports**: WebSocket over `tokio-tungstenite`, in-memory loopback for tests
//! - **Keepalive**: PING/PONG with RTT measurement and idle timeout
//! - **Auto-reconnect**: exponential backoff, bounded by a budget
//! - **Notices**: every state transition reported to an owner over a channel
//!
//! ## Example
//!
//! ```rust,no_run
//! use wspool_session::{SessionFactory, SessionOptions, SessionState};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let factory = SessionFactory::websocket();
//! let session = factory.connect("ws://127.0.0.1:8546", &SessionOptions::default())?;
//!
//! let mut inbound = session.subscribe();
//! session.wait_active().await?;
//! session.send(r#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber","params":[]}"#)?;
//!
//! if let Ok(reply) = inbound.recv().await {
//!     println!("reply: {:?}", reply);
//! }
//! assert_eq!(session.state(), SessionState::Active);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod endpoint;
pub mod error;
pub mod factory;
pub mod keepalive;
pub mod reconnect;
pub mod session;
pub mod transport;

// Re-export main types
pub use endpoint::{Endpoint, Scheme};
pub use error::SessionError;
pub use factory::SessionFactory;
pub use reconnect::{Backoff, ReconnectTracker};
pub use session::{
    DeathCause, Session, SessionId, SessionNotice, SessionOptions, SessionState, SessionStats,
    SessionStatus,
};
pub use transport::{Connection, Frame, Inbound, MemoryTransport, Transport, WsTransport};
