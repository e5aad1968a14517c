//! Pool error types.

use thiserror::Error;
use wspool_session::SessionError;

/// Errors returned by `acquire`
///
/// Connectivity problems are never reported here; they show up as session
/// state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Endpoint string could not be parsed
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Pool or session options out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<SessionError> for PoolError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidEndpoint(msg) => PoolError::InvalidEndpoint(msg),
            SessionError::InvalidOptions(msg) => PoolError::InvalidConfig(msg),
            other => PoolError::InvalidConfig(other.to_string()),
        }
    }
}
