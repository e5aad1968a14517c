//! Fixed-capacity pool of sessions to one endpoint.
//!
//! A pool hands out sessions least-recently-returned first. It grows lazily up
//! to its capacity and never returns a session that was dead when `acquire`
//! took the pool lock: dead sessions are purged at the start of every acquire,
//! and a background reaper evicts them as soon as their notice arrives.
//!
//! Sessions die on their own driver task, outside the pool lock, so a session
//! can still turn dead between that purge and the caller receiving it. Callers
//! observe this through `Session::state` or a rejected `send`; the next acquire
//! replaces it.

use crate::error::PoolError;
use crate::key::PoolKey;
use crate::manager::PoolEventHandler;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use wspool_session::{
    Session, SessionFactory, SessionId, SessionNotice, SessionOptions, SessionState,
};

/// Configuration for a pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum number of tracked sessions
    pub capacity: usize,
    /// Options for every session the pool creates
    pub session: SessionOptions,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            capacity: 1,
            session: SessionOptions::default(),
        }
    }
}

impl PoolOptions {
    /// Check that the options describe a usable pool
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "pool capacity must be at least 1".to_string(),
            ));
        }
        self.session.validate()?;
        Ok(())
    }
}

/// Counters for a pool
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions currently tracked
    pub tracked: usize,
    /// Sessions created over the pool's lifetime
    pub created: u64,
    /// Dead sessions removed
    pub evicted: u64,
    /// Successful acquires
    pub acquired: u64,
}

#[derive(Debug)]
struct PoolShared {
    key: PoolKey,
    options: PoolOptions,
    factory: SessionFactory,
    /// Front is the least recently returned session
    tracked: Mutex<VecDeque<Session>>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    event_handler: Option<Arc<dyn PoolEventHandler>>,
    created: AtomicU64,
    evicted: AtomicU64,
    acquired: AtomicU64,
}

impl PoolShared {
    fn notify_evicted(&self, evicted: &[Session]) {
        for session in evicted {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            info!(
                "Evicted session {} from pool {} ({:?})",
                session.id(),
                self.key,
                session.death_cause()
            );
            if let Some(ref handler) = self.event_handler {
                handler.notify_session_evicted(&self.key, session.id());
            }
        }
    }

    /// Remove `id` if it is still tracked and terminate it
    async fn evict(&self, id: SessionId) -> bool {
        let removed = {
            let mut tracked = self.tracked.lock().await;
            match tracked.iter().position(|s| s.id() == id) {
                Some(index) => tracked.remove(index),
                None => None,
            }
        };
        match removed {
            Some(session) => {
                // No-op for sessions that already died
                session.terminate();
                self.notify_evicted(std::slice::from_ref(&session));
                true
            }
            None => false,
        }
    }
}

/// Remove every dead session from `tracked`, returning the removed ones
fn purge_dead(tracked: &mut VecDeque<Session>) -> Vec<Session> {
    let mut dead = Vec::new();
    tracked.retain(|session| {
        if session.is_dead() {
            dead.push(session.clone());
            false
        } else {
            true
        }
    });
    dead
}

/// Pool of sessions to one endpoint within one namespace
#[derive(Clone, Debug)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Create an empty pool and start its reaper. Must be called within a Tokio runtime.
    pub fn new(
        key: PoolKey,
        options: PoolOptions,
        factory: SessionFactory,
        event_handler: Option<Arc<dyn PoolEventHandler>>,
    ) -> Result<Self, PoolError> {
        options.validate()?;

        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PoolShared {
            key,
            options,
            factory,
            tracked: Mutex::new(VecDeque::new()),
            notices: notices_tx,
            event_handler,
            created: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
        });

        tokio::spawn(reap(Arc::downgrade(&shared), notices_rx));

        info!(
            "Created pool {} with capacity {}",
            shared.key, shared.options.capacity
        );
        Ok(Self { shared })
    }

    /// Key this pool is registered under
    pub fn key(&self) -> &PoolKey {
        &self.shared.key
    }

    /// Options the pool was created with
    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    /// Maximum number of tracked sessions
    pub fn capacity(&self) -> usize {
        self.shared.options.capacity
    }

    /// Hand out a session.
    ///
    /// Creates a new session while the pool is below capacity, otherwise
    /// returns the least recently returned live one. The returned session may
    /// still be connecting.
    pub async fn acquire(&self) -> Session {
        let shared = &self.shared;

        let (session, created, evicted, tracked_count) = {
            let mut tracked = shared.tracked.lock().await;
            let evicted = purge_dead(&mut tracked);

            let reused = if tracked.len() >= shared.options.capacity {
                tracked.pop_front()
            } else {
                None
            };

            let (session, created) = match reused {
                Some(session) => (session, false),
                None => {
                    let session = shared.factory.create_observed(
                        shared.key.endpoint(),
                        &shared.options.session,
                        shared.notices.clone(),
                    );
                    (session, true)
                }
            };
            tracked.push_back(session.clone());
            (session, created, evicted, tracked.len())
        };

        // Handler calls happen outside the lock
        shared.notify_evicted(&evicted);
        shared.acquired.fetch_add(1, Ordering::Relaxed);

        if created {
            shared.created.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Pool {} created session {} ({}/{})",
                shared.key,
                session.id(),
                tracked_count,
                shared.options.capacity
            );
            if let Some(ref handler) = shared.event_handler {
                handler.notify_session_added(&shared.key, session.id());
            }
        } else {
            debug!("Pool {} reused session {}", shared.key, session.id());
        }

        session
    }

    /// Number of tracked sessions, dead ones not yet evicted included
    pub async fn len(&self) -> usize {
        self.shared.tracked.lock().await.len()
    }

    /// Whether the pool tracks no sessions
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of tracked sessions, least recently returned first
    pub async fn sessions(&self) -> Vec<Session> {
        self.shared.tracked.lock().await.iter().cloned().collect()
    }

    /// Remove a session from the pool and terminate it.
    ///
    /// Returns false if the pool does not track `id`.
    pub async fn evict(&self, id: SessionId) -> bool {
        self.shared.evict(id).await
    }

    /// Current counters
    pub async fn stats(&self) -> PoolStats {
        let tracked = self.len().await;
        PoolStats {
            tracked,
            created: self.shared.created.load(Ordering::Relaxed),
            evicted: self.shared.evicted.load(Ordering::Relaxed),
            acquired: self.shared.acquired.load(Ordering::Relaxed),
        }
    }

    /// Terminate and drop every tracked session
    pub async fn shutdown(&self) {
        let drained: Vec<Session> = self.shared.tracked.lock().await.drain(..).collect();
        for session in &drained {
            session.terminate();
        }
        self.shared.notify_evicted(&drained);
        info!(
            "Pool {} shut down, {} sessions terminated",
            self.shared.key,
            drained.len()
        );
    }
}

/// Consume transition notices for a pool until the pool is dropped
async fn reap(shared: Weak<PoolShared>, mut notices: mpsc::UnboundedReceiver<SessionNotice>) {
    while let Some(notice) = notices.recv().await {
        let Some(pool) = shared.upgrade() else {
            break;
        };

        if let Some(ref handler) = pool.event_handler {
            handler.notify_session_state(&pool.key, notice.id, notice.from, notice.to);
        }

        if notice.to == SessionState::Dead {
            pool.evict(notice.id).await;
        }
    }
    debug!("Pool reaper stopped");
}
