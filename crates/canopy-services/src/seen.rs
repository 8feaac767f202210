//! Per-peer record of which tx hashes have already crossed a connection.
//!
//! A peer lands here when it sends us a tx, acks one, or receives one from
//! us. The broadcast fan-out skips any peer that has already seen a hash.
//! Each peer's record is a bounded LRU; forgetting a hash costs at most one
//! redundant re-send.

use std::num::NonZeroUsize;
use std::sync::Arc;

use canopy_core::crypto::Hash;
use dashmap::DashMap;
use lru::LruCache;

#[derive(Clone)]
pub struct SeenSet {
    peers: Arc<DashMap<String, LruCache<Hash, ()>>>,
    capacity: NonZeroUsize,
}

impl SeenSet {
    /// A capacity of zero is treated as one.
    pub fn new(capacity_per_peer: usize) -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            capacity: NonZeroUsize::new(capacity_per_peer).unwrap_or(NonZeroUsize::MIN),
        }
    }

    pub fn mark_seen(&self, peer_id: &str, hash: Hash) {
        if let Some(mut seen) = self.peers.get_mut(peer_id) {
            seen.put(hash, ());
            return;
        }
        self.peers
            .entry(peer_id.to_string())
            .or_insert_with(|| LruCache::new(self.capacity))
            .put(hash, ());
    }

    /// Lookups do not refresh recency.
    pub fn has_seen(&self, peer_id: &str, hash: &Hash) -> bool {
        self.peers
            .get(peer_id)
            .map(|seen| seen.contains(hash))
            .unwrap_or(false)
    }

    pub fn forget_peer(&self, peer_id: &str) {
        self.peers.remove(peer_id);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}
