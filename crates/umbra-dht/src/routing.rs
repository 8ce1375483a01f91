//! Kademlia routing table implementation.
//!
//! The routing table organizes known peers by XOR distance from the local
//! peer. It is the only owner of long-lived peer records: lookups read
//! snapshots through [`PeerDirectory`] and report unresponsive peers back.

use std::collections::VecDeque;

use parking_lot::RwLock;
use tracing::debug;
use umbra_core::{sort_by_distance, Destination, Key};

use crate::config::RoutingTableConfig;
use crate::peer::KademliaPeer;

/// Read access to known peers, plus a channel for staleness signals.
pub trait PeerDirectory: Send + Sync {
    /// Returns up to `count` known peers, closest to `key` first.
    fn closest_peers(&self, key: &Key, count: usize) -> Vec<KademliaPeer>;

    /// Signals that `peer` failed to answer a query in time.
    fn mark_stale(&self, peer: &KademliaPeer);
}

/// A k-bucket holding up to k peers at a specific distance range.
#[derive(Debug)]
pub struct KBucket {
    /// Peers in this bucket (ordered by last seen, most recent last)
    peers: VecDeque<KademliaPeer>,
    /// Replacement cache for when bucket is full
    replacement_cache: VecDeque<KademliaPeer>,
    /// Maximum bucket size
    bucket_size: usize,
    /// Maximum replacement cache size
    cache_size: usize,
}

impl KBucket {
    /// Creates a new k-bucket.
    pub fn new(bucket_size: usize) -> Self {
        Self {
            peers: VecDeque::with_capacity(bucket_size),
            replacement_cache: VecDeque::with_capacity(bucket_size),
            bucket_size,
            cache_size: bucket_size,
        }
    }

    /// Returns the number of peers in this bucket.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if this bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Returns true if this bucket is full.
    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.bucket_size
    }

    /// Returns all peers in this bucket.
    pub fn peers(&self) -> impl Iterator<Item = &KademliaPeer> {
        self.peers.iter()
    }

    /// Gets a peer by identifier.
    pub fn get(&self, key: &Key) -> Option<&KademliaPeer> {
        self.peers.iter().find(|p| p.key() == key)
    }

    /// Adds a peer or refreshes an existing one.
    ///
    /// A known peer moves to the most-recently-seen end and its staleness
    /// counter is cleared. Returns false if the bucket was full and the peer
    /// went to the replacement cache instead.
    pub fn insert(&mut self, peer: KademliaPeer) -> bool {
        if let Some(pos) = self.peers.iter().position(|p| *p == peer) {
            if let Some(mut existing) = self.peers.remove(pos) {
                existing.reset_stale();
                self.peers.push_back(existing);
            }
            return true;
        }

        if !self.is_full() {
            self.peers.push_back(peer);
            return true;
        }

        if let Some(pos) = self.replacement_cache.iter().position(|p| *p == peer) {
            self.replacement_cache.remove(pos);
        }
        if self.replacement_cache.len() >= self.cache_size {
            self.replacement_cache.pop_front();
        }
        self.replacement_cache.push_back(peer);
        false
    }

    /// Removes a peer from this bucket.
    ///
    /// If there are peers in the replacement cache, the most recent one is promoted.
    pub fn remove(&mut self, key: &Key) -> Option<KademliaPeer> {
        let pos = self.peers.iter().position(|p| p.key() == key)?;
        let removed = self.peers.remove(pos)?;

        if let Some(replacement) = self.replacement_cache.pop_back() {
            self.peers.push_back(replacement);
        }

        Some(removed)
    }

    /// Increments the staleness counter of a peer.
    ///
    /// Evicts the peer once the counter reaches `max_stale_count` and returns
    /// it; returns None if the peer stays or is unknown.
    pub fn mark_stale(&mut self, key: &Key, max_stale_count: u32) -> Option<KademliaPeer> {
        let peer = self.peers.iter_mut().find(|p| p.key() == key)?;
        peer.increment_stale();
        if peer.stale_count() >= max_stale_count {
            return self.remove(key);
        }
        None
    }

    /// Returns the number of peers waiting in the replacement cache.
    pub fn replacement_count(&self) -> usize {
        self.replacement_cache.len()
    }
}

/// Kademlia routing table.
pub struct RoutingTable {
    /// Local peer identifier
    local_key: Key,
    /// K-buckets (index = 255 - common prefix length)
    buckets: Vec<RwLock<KBucket>>,
    /// Configuration
    config: RoutingTableConfig,
}

impl RoutingTable {
    /// Creates a new routing table.
    pub fn new(local_key: Key, config: RoutingTableConfig) -> Self {
        // 256 buckets for 256-bit identifiers
        let buckets = (0..256)
            .map(|_| RwLock::new(KBucket::new(config.bucket_size)))
            .collect();

        Self {
            local_key,
            buckets,
            config,
        }
    }

    /// Returns the local peer identifier.
    pub fn local_key(&self) -> &Key {
        &self.local_key
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RoutingTableConfig {
        &self.config
    }

    /// Computes the bucket index for an identifier.
    ///
    /// This is 255 - leading_zeros(distance) for non-self identifiers.
    pub fn bucket_index(&self, key: &Key) -> Option<usize> {
        if *key == self.local_key {
            return None;
        }
        let leading_zeros = self.local_key.distance(key).leading_zeros();
        Some(255 - leading_zeros as usize)
    }

    /// Adds or refreshes a peer.
    pub fn insert(&self, peer: KademliaPeer) -> bool {
        match self.bucket_index(peer.key()) {
            Some(index) => self.buckets[index].write().insert(peer),
            None => false, // Can't add self
        }
    }

    /// Records that a peer was heard from, adding it if unknown.
    pub fn add_or_touch(&self, destination: &Destination) -> bool {
        self.insert(KademliaPeer::new(destination.clone()))
    }

    /// Removes a peer from the routing table.
    pub fn remove(&self, key: &Key) -> Option<KademliaPeer> {
        let index = self.bucket_index(key)?;
        self.buckets[index].write().remove(key)
    }

    /// Gets a peer by identifier.
    pub fn get(&self, key: &Key) -> Option<KademliaPeer> {
        let index = self.bucket_index(key)?;
        self.buckets[index].read().get(key).cloned()
    }

    /// Returns true if the peer is in the routing table.
    pub fn contains(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    /// Finds the `count` closest peers to a target.
    pub fn closest(&self, target: &Key, count: usize) -> Vec<KademliaPeer> {
        let mut peers = self.all_peers();
        sort_by_distance(&mut peers, target);
        peers.truncate(count);
        peers
    }

    /// Returns the total number of peers in the routing table.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }

    /// Returns true if the routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all peers in the routing table.
    pub fn all_peers(&self) -> Vec<KademliaPeer> {
        let mut peers = Vec::new();
        for bucket in &self.buckets {
            peers.extend(bucket.read().peers().cloned());
        }
        peers
    }
}

impl PeerDirectory for RoutingTable {
    fn closest_peers(&self, key: &Key, count: usize) -> Vec<KademliaPeer> {
        self.closest(key, count)
    }

    fn mark_stale(&self, peer: &KademliaPeer) {
        let Some(index) = self.bucket_index(peer.key()) else {
            return;
        };
        let evicted = self.buckets[index]
            .write()
            .mark_stale(peer.key(), self.config.max_stale_count);
        if let Some(evicted) = evicted {
            debug!(peer = %evicted.key(), stale_count = evicted.stale_count(), "Evicted stale peer");
        }
    }
}
