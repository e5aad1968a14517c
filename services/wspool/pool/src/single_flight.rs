//! Single-flight keyed initialization.
//!
//! Concurrent callers asking for the same key join one in-flight
//! initialization instead of each running their own. Once a value is built it
//! is returned to every later caller. A failed initialization leaves the slot
//! empty so the next caller can try again.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Keyed map whose values are built at most once
#[derive(Debug)]
pub struct SingleFlight<K, V>
where
    K: Eq + Hash,
{
    slots: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Empty registry
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Value for `key`, building it with `init` if no caller has yet.
    ///
    /// The boolean is true for the one caller whose `init` produced the value.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: K, init: F) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // Clone the cell out so the shard lock is not held across the await
        let cell = Arc::clone(self.slots.entry(key).or_default().value());

        let mut built = false;
        let value = cell
            .get_or_try_init(|| {
                built = true;
                init()
            })
            .await?
            .clone();
        Ok((value, built))
    }

    /// Value for `key` if it has been built
    pub fn get(&self, key: &K) -> Option<V> {
        self.slots
            .get(key)
            .and_then(|cell| cell.value().get().cloned())
    }

    /// Number of built values
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value().initialized())
            .count()
    }

    /// Whether nothing has been built
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all built values
    pub fn values(&self) -> Vec<V> {
        self.slots
            .iter()
            .filter_map(|slot| slot.value().get().cloned())
            .collect()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
