//! Pool manager: one pool per (endpoint, namespace)
//!
//! This module provides the PoolManager that owns every pool in the process,
//! creates them on first use, and hands out sessions from them.

use crate::error::PoolError;
use crate::key::{Namespace, PoolKey};
use crate::pool::{Pool, PoolOptions};
use crate::single_flight::SingleFlight;
use std::sync::Arc;
use tracing::{debug, info};
use wspool_session::{Endpoint, Session, SessionFactory, SessionId, SessionState};

/// Trait for handling pool events
pub trait PoolEventHandler: Send + Sync + std::fmt::Debug {
    /// Notify that a pool was created
    fn notify_pool_created(&self, key: &PoolKey);
    /// Notify that a pool created a session
    fn notify_session_added(&self, key: &PoolKey, id: SessionId);
    /// Notify that a pooled session changed state
    fn notify_session_state(&self, key: &PoolKey, id: SessionId, from: SessionState, to: SessionState);
    /// Notify that a session was removed from its pool
    fn notify_session_evicted(&self, key: &PoolKey, id: SessionId);
}

/// Owns every pool and routes acquires to them
#[derive(Debug)]
pub struct PoolManager {
    /// Builds sessions for every pool
    factory: SessionFactory,
    /// Pools by key
    pools: SingleFlight<PoolKey, Pool>,
    /// Event handler for pool state changes
    event_handler: Option<Arc<dyn PoolEventHandler>>,
}

impl PoolManager {
    /// Create a manager whose pools use `factory`
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            factory,
            pools: SingleFlight::new(),
            event_handler: None,
        }
    }

    /// Create a manager that connects over WebSocket
    pub fn websocket() -> Self {
        Self::new(SessionFactory::websocket())
    }

    /// Set the event handler for pool state changes.
    ///
    /// Only pools created afterwards report to it.
    pub fn set_event_handler<T>(&mut self, handler: Arc<T>)
    where
        T: PoolEventHandler + 'static,
    {
        self.event_handler = Some(handler);
    }

    /// Acquire a session for `endpoint` in `namespace` (global when `None`).
    ///
    /// The pool for the key is created with `options` on first use. Later
    /// calls for the same key reuse it and ignore their `options`. Only
    /// malformed input fails; an unreachable endpoint yields a session that
    /// is reconnecting or already dead.
    pub async fn acquire(
        &self,
        endpoint: &str,
        namespace: Option<&str>,
        options: &PoolOptions,
    ) -> Result<Session, PoolError> {
        let endpoint = Endpoint::parse(endpoint)?;
        let namespace = namespace.map(Namespace::from).unwrap_or_default();
        self.acquire_endpoint(&endpoint, namespace, options).await
    }

    /// Acquire a session for an already parsed endpoint
    pub async fn acquire_endpoint(
        &self,
        endpoint: &Endpoint,
        namespace: Namespace,
        options: &PoolOptions,
    ) -> Result<Session, PoolError> {
        let key = PoolKey::new(endpoint.clone(), namespace);
        let pool = self.pool_for(key, options).await?;
        Ok(pool.acquire().await)
    }

    /// Pool for `key`, creating it with `options` if it does not exist yet
    pub async fn pool_for(&self, key: PoolKey, options: &PoolOptions) -> Result<Pool, PoolError> {
        options.validate()?;

        let (pool, created) = self
            .pools
            .get_or_try_init(key.clone(), || async {
                Pool::new(
                    key.clone(),
                    options.clone(),
                    self.factory.clone(),
                    self.event_handler.clone(),
                )
            })
            .await?;

        if created {
            info!("Registered pool {}", key);
            if let Some(ref handler) = self.event_handler {
                handler.notify_pool_created(&key);
            }
        } else if pool.options() != options {
            debug!(
                "Pool {} already exists with capacity {}; ignoring requested options",
                key,
                pool.capacity()
            );
        }

        Ok(pool)
    }

    /// Existing pool for `key`
    pub fn pool(&self, key: &PoolKey) -> Option<Pool> {
        self.pools.get(key)
    }

    /// Number of pools
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Snapshot of all pools
    pub fn pools(&self) -> Vec<Pool> {
        self.pools.values()
    }

    /// Terminate every session in every pool.
    ///
    /// Pools stay registered; a later acquire refills them.
    pub async fn shutdown(&self) {
        let pools = self.pools.values();
        info!("Shutting down {} pools", pools.len());
        for pool in pools {
            pool.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;
    use wspool_session::{MemoryTransport, SessionOptions};

    #[derive(Debug, Default)]
    struct RecordingHandler {
        events: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl PoolEventHandler for RecordingHandler {
        fn notify_pool_created(&self, key: &PoolKey) {
            self.events.lock().unwrap().push(format!("pool {}", key));
        }

        fn notify_session_added(&self, key: &PoolKey, id: SessionId) {
            self.events.lock().unwrap().push(format!("added {} {}", key, id));
        }

        fn notify_session_state(&self, _key: &PoolKey, id: SessionId, _from: SessionState, to: SessionState) {
            self.events.lock().unwrap().push(format!("state {} {}", id, to));
        }

        fn notify_session_evicted(&self, _key: &PoolKey, id: SessionId) {
            self.events.lock().unwrap().push(format!("evicted {}", id));
        }
    }

    fn options(capacity: usize) -> PoolOptions {
        PoolOptions {
            capacity,
            session: SessionOptions {
                reconnect_delay: Duration::from_millis(5),
                max_reconnect_delay: Duration::from_millis(20),
                ping_interval: None,
                idle_timeout: None,
                ..SessionOptions::default()
            },
        }
    }

    fn manager() -> PoolManager {
        PoolManager::new(SessionFactory::new(Arc::new(MemoryTransport::new())))
    }

    #[tokio::test]
    async fn test_rejects_malformed_input() {
        let manager = manager();

        let err = manager
            .acquire("http://localhost:8546", None, &options(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidEndpoint(_)));

        let err = manager
            .acquire("ws://localhost:8546", None, &options(0))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));

        assert_eq!(manager.pool_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_acquires_share_one_pool() {
        let manager = Arc::new(manager());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager
                    .acquire("ws://localhost:8546", None, &options(1))
                    .await
                    .unwrap()
                    .id()
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(manager.pool_count(), 1);
    }

    #[tokio::test]
    async fn test_first_options_win() {
        let manager = manager();

        manager
            .acquire("ws://localhost:8546", None, &options(1))
            .await
            .unwrap();
        let a = manager
            .acquire("ws://localhost:8546", None, &options(4))
            .await
            .unwrap();
        let b = manager
            .acquire("ws://localhost:8546", None, &options(4))
            .await
            .unwrap();

        assert_eq!(a, b);
        let key = PoolKey::global(Endpoint::parse("ws://localhost:8546").unwrap());
        let pool = manager.pool(&key).unwrap();
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let manager = manager();

        let global = manager
            .acquire("ws://localhost:8546", None, &options(1))
            .await
            .unwrap();
        let explicit_global = manager
            .acquire("ws://LOCALHOST:8546/", Some("global"), &options(1))
            .await
            .unwrap();
        let reader = manager
            .acquire("ws://localhost:8546", Some("reader"), &options(1))
            .await
            .unwrap();

        assert_eq!(global, explicit_global);
        assert_ne!(global, reader);
        assert_eq!(manager.pool_count(), 2);

        // Killing one namespace's session leaves the other untouched
        reader.terminate();
        let reader_again = manager
            .acquire("ws://localhost:8546", Some("reader"), &options(1))
            .await
            .unwrap();
        assert_ne!(reader_again, reader);
        assert_eq!(
            manager
                .acquire("ws://localhost:8546", None, &options(1))
                .await
                .unwrap(),
            global
        );
    }

    #[tokio::test]
    async fn test_event_handler_and_shutdown() {
        let mut manager = manager();
        let handler = Arc::new(RecordingHandler::default());
        manager.set_event_handler(Arc::clone(&handler));

        let session = manager
            .acquire("ws://localhost:8546", Some("events"), &options(1))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), session.wait_active())
            .await
            .unwrap()
            .unwrap();

        manager.shutdown().await;
        assert!(session.is_dead());
        assert_eq!(manager.pool_count(), 1);

        let events = handler.events();
        assert_eq!(events[0], "pool events@ws://localhost:8546");
        assert_eq!(events[1], format!("added events@ws://localhost:8546 {}", session.id()));
        assert!(events.contains(&format!("evicted {}", session.id())));
    }
}
