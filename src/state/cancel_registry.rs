use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::stream::CancelToken;

/// Maps in-flight message ids to their cancellation tokens.
///
/// The map is striped across shards so that concurrent requests registering
/// and releasing different ids rarely contend on the same lock.
pub struct CancellationRegistry {
    shards: Vec<RwLock<FxHashMap<String, CancelToken>>>,
    released: AtomicU64,
}

pub const DEFAULT_REGISTRY_SHARDS: usize = 16;

impl CancellationRegistry {
    /// A registry with `shard_count` stripes (at least one).
    #[must_use]
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(RwLock::new(FxHashMap::default()));
        }
        Self {
            shards,
            released: AtomicU64::new(0),
        }
    }

    fn shard(&self, id: &str) -> &RwLock<FxHashMap<String, CancelToken>> {
        let hash = FxBuildHasher.hash_one(id);
        // Modulo keeps the index within bounds; shards is never empty.
        let index = (hash % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// Associate `token` with `id`.
    ///
    /// A second registration under the same id silently replaces the first
    /// token; the replaced token is neither cancelled nor cleaned up.
    pub fn register(&self, id: &str, token: CancelToken) {
        let replaced = self.shard(id).write().insert(id.to_string(), token);
        if replaced.is_some() {
            tracing::debug!(message_id = id, "cancellation handle replaced");
        }
    }

    /// Register `token` and return a guard whose drop releases the entry,
    /// provided it still holds this token.
    #[must_use]
    pub fn register_scoped(self: &Arc<Self>, id: &str, token: CancelToken) -> RegistrationGuard {
        self.register(id, token.clone());
        RegistrationGuard {
            registry: Arc::clone(self),
            id: id.to_string(),
            token,
        }
    }

    /// Cancel the request registered under `id`. Returns whether a handle was
    /// found. The entry stays registered until its owner cleans it up.
    pub fn cancel(&self, id: &str) -> bool {
        let token = self.shard(id).read().get(id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                tracing::debug!(message_id = id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Remove the association for `id`. Returns whether an entry existed.
    pub fn cleanup(&self, id: &str) -> bool {
        let removed = self.shard(id).write().remove(id).is_some();
        if removed {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove `id` only if it still maps to `token`. A replaced owner
    /// releasing late leaves the replacement registered.
    pub fn release(&self, id: &str, token: &CancelToken) -> bool {
        let mut shard = self.shard(id).write();
        let owned = shard.get(id).is_some_and(|current| current.same_as(token));
        if owned {
            shard.remove(id);
            self.released.fetch_add(1, Ordering::Relaxed);
        }
        owned
    }

    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.shard(id).read().contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Total number of entries removed by [`cleanup`](Self::cleanup) or
    /// [`release`](Self::release).
    #[must_use]
    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_SHARDS)
    }
}

/// Releases its own registry entry on drop.
pub struct RegistrationGuard {
    registry: Arc<CancellationRegistry>,
    id: String,
    token: CancelToken,
}

impl RegistrationGuard {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.release(&self.id, &self.token);
    }
}
