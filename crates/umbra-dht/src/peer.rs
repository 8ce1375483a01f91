//! Peer records.

use std::fmt;
use std::hash::{Hash, Hasher};

use umbra_core::{Destination, Identified, Key};
use umbra_proto::PeerInfo;

/// A peer known to the DHT.
///
/// Two records are equal when their destinations have the same identifier,
/// whatever their staleness counters say.
#[derive(Clone)]
pub struct KademliaPeer {
    destination: Destination,
    stale_count: u32,
}

impl KademliaPeer {
    /// Creates a record with a zero staleness counter.
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            stale_count: 0,
        }
    }

    /// Creates a record with the given staleness counter.
    pub fn with_stale_count(destination: Destination, stale_count: u32) -> Self {
        Self {
            destination,
            stale_count,
        }
    }

    /// Returns the peer's destination.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Returns the peer's identifier.
    pub fn key(&self) -> &Key {
        self.destination.key()
    }

    /// Returns the staleness counter.
    pub fn stale_count(&self) -> u32 {
        self.stale_count
    }

    /// Counts one more unanswered query.
    pub fn increment_stale(&mut self) {
        self.stale_count = self.stale_count.saturating_add(1);
    }

    /// Clears the staleness counter after the peer was heard from.
    pub fn reset_stale(&mut self) {
        self.stale_count = 0;
    }

    /// Returns the wire representation used in peer lists.
    pub fn to_info(&self) -> PeerInfo {
        PeerInfo {
            destination: self.destination.clone(),
            stale_count: self.stale_count,
        }
    }
}

impl From<PeerInfo> for KademliaPeer {
    fn from(info: PeerInfo) -> Self {
        Self::with_stale_count(info.destination, info.stale_count)
    }
}

impl Identified for KademliaPeer {
    fn key(&self) -> &Key {
        self.destination.key()
    }
}

impl PartialEq for KademliaPeer {
    fn eq(&self, other: &Self) -> bool {
        self.destination == other.destination
    }
}

impl Eq for KademliaPeer {}

impl Hash for KademliaPeer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.destination.hash(state);
    }
}

impl fmt::Debug for KademliaPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KademliaPeer")
            .field("key", self.key())
            .field("stale_count", &self.stale_count)
            .finish()
    }
}
