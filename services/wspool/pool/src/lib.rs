//! Fixed-capacity session pools keyed by endpoint and namespace.
//!
//! A `PoolManager` owns one `Pool` per (endpoint, namespace). Each pool hands
//! out sessions least-recently-returned first, grows lazily to its capacity,
//! and evicts sessions that die so the next acquire builds a replacement.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wspool_pool::{PoolManager, PoolOptions};
//!
//! # async fn example() -> Result<(), wspool_pool::PoolError> {
//! let manager = PoolManager::websocket();
//! let options = PoolOptions { capacity: 4, ..PoolOptions::default() };
//!
//! let session = manager.acquire("ws://127.0.0.1:8546", None, &options).await?;
//! let reader = manager.acquire("ws://127.0.0.1:8546", Some("reader"), &options).await?;
//! assert_ne!(session.id(), reader.id());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod manager;
pub mod pool;
pub mod single_flight;

// Re-export main types
pub use error::PoolError;
pub use key::{Namespace, PoolKey};
pub use manager::{PoolEventHandler, PoolManager};
pub use pool::{Pool, PoolOptions, PoolStats};
pub use single_flight::SingleFlight;
