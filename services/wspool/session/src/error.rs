//! Session error types.

use thiserror::Error;

/// Session and transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Endpoint string could not be parsed or uses an unsupported form
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Connection establishment failed (refused, timed out, handshake error)
    #[error("connect failure: {0}")]
    ConnectFailure(String),

    /// Reconnect budget used up; the session is dead
    #[error("reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Failed reconnect attempts when the session died
        attempts: u32,
    },

    /// Session was torn down explicitly
    #[error("session terminated")]
    Terminated,

    /// Error on an established connection
    #[error("transport error: {0}")]
    Transport(String),

    /// Session options out of range
    #[error("invalid session options: {0}")]
    InvalidOptions(String),
}
