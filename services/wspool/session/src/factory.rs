//! Session factory.
//!
//! The factory is the only place a transport is bound to sessions. It never
//! caches: every call mints a new session with its own identity and driver.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::endpoint::Endpoint;
use crate::error::SessionError;
use crate::session::{Session, SessionNotice, SessionOptions};
use crate::transport::{Transport, WsTransport};

/// Builds sessions over a transport
#[derive(Clone, Debug)]
pub struct SessionFactory {
    transport: Arc<dyn Transport>,
}

impl SessionFactory {
    /// Factory over an arbitrary transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Factory over the WebSocket transport
    pub fn websocket() -> Self {
        Self::new(Arc::new(WsTransport::new()))
    }

    /// Transport used for new sessions
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Start a new session in `Connecting`. Must be called within a Tokio runtime.
    pub fn create(&self, endpoint: &Endpoint, options: &SessionOptions) -> Session {
        Session::spawn(
            endpoint.clone(),
            options.clone(),
            Arc::clone(&self.transport),
            None,
        )
    }

    /// Start a new session that reports its transitions on `notices`
    pub fn create_observed(
        &self,
        endpoint: &Endpoint,
        options: &SessionOptions,
        notices: mpsc::UnboundedSender<SessionNotice>,
    ) -> Session {
        Session::spawn(
            endpoint.clone(),
            options.clone(),
            Arc::clone(&self.transport),
            Some(notices),
        )
    }

    /// Parse `url` and start a session to it
    pub fn connect(&self, url: &str, options: &SessionOptions) -> Result<Session, SessionError> {
        let endpoint = Endpoint::parse(url)?;
        Ok(self.create(&endpoint, options))
    }
}

impl Default for SessionFactory {
    fn default() -> Self {
        Self::websocket()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::transport::MemoryTransport;

    #[tokio::test]
    async fn test_identical_calls_make_distinct_sessions() {
        let factory = SessionFactory::new(Arc::new(MemoryTransport::unreachable()));
        let endpoint = Endpoint::parse("ws://127.0.0.1:8546").unwrap();
        let options = SessionOptions::default();

        let a = factory.create(&endpoint, &options);
        let b = factory.create(&endpoint, &options);

        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a.endpoint(), b.endpoint());
        a.terminate();
        b.terminate();
    }

    #[tokio::test]
    async fn test_create_returns_connecting_session() {
        let factory = SessionFactory::new(Arc::new(MemoryTransport::unreachable()));
        let session = factory
            .connect("ws://127.0.0.1:8546", &SessionOptions::default())
            .unwrap();
        // Initial attempt is refused, so it never reaches Active
        assert!(matches!(
            session.state(),
            SessionState::Connecting | SessionState::Reconnecting
        ));
        session.terminate();
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let factory = SessionFactory::new(Arc::new(MemoryTransport::new()));
        let result = factory.connect("not a url", &SessionOptions::default());
        assert!(matches!(result, Err(SessionError::InvalidEndpoint(_))));
    }
}
