//! Duplicate and loop detection for forwarded queries.
//!
//! Remembers recently seen correlation ids in a bounded [`moka`] cache with
//! least-recently-used eviction. A query is rejected when its id was seen
//! before or when this broker already appears in its forwarding path.

use std::sync::Mutex;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

/// Bounded LRU membership set of query correlation ids.
///
/// A capacity of `0` disables tracking: every id is reported as new and
/// nothing is remembered.
pub struct LoopGuard {
    inner: Mutex<Option<Cache<String, ()>>>,
}

impl std::fmt::Debug for LoopGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopGuard")
            .field("enabled", &self.cache().is_some())
            .finish()
    }
}

fn build(capacity: u64) -> Option<Cache<String, ()>> {
    (capacity > 0).then(|| {
        Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build()
    })
}

impl LoopGuard {
    /// Create a guard remembering up to `capacity` ids.
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Mutex::new(build(capacity)),
        }
    }

    fn cache(&self) -> Option<Cache<String, ()>> {
        // Cache handles are cheap clones of the same shared store.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns `true` if `id` is new (and remembers it), `false` if it was
    /// already remembered.
    pub fn contains_and_remember(&self, id: &str) -> bool {
        let Some(cache) = self.cache() else {
            return true;
        };
        let fresh = cache.entry(id.to_owned()).or_insert(()).is_fresh();
        if fresh {
            cache.run_pending_tasks();
        }
        fresh
    }

    /// Whether a query is unique: `false` if `local_id` already appears in
    /// its forwarding `path`, otherwise [`Self::contains_and_remember`].
    pub fn is_unique(&self, id: &str, path: &[String], local_id: &str) -> bool {
        if path.iter().any(|hop| hop == local_id) {
            tracing::debug!(%local_id, "query already passed through this broker");
            return false;
        }
        self.contains_and_remember(id)
    }

    /// Forget everything and change the capacity.
    pub fn resize(&self, capacity: u64) {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = build(capacity);
    }

    /// Whether `id` is currently remembered. Does not remember it.
    pub fn contains(&self, id: &str) -> bool {
        self.cache().is_some_and(|cache| cache.contains_key(id))
    }

    /// Number of remembered ids.
    pub fn len(&self) -> u64 {
        self.cache().map_or(0, |cache| {
            cache.run_pending_tasks();
            cache.entry_count()
        })
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
