//! Umbra DHT - Kademlia closest-nodes lookup over an anonymizing transport.
//!
//! Implements:
//! - Peer records and the k-bucket routing table
//! - Collaborator traits for sending and receiving packets
//! - An in-memory transport for simulated networks
//! - The iterative closest-nodes lookup task
//! - A DHT service that answers queries and runs lookups

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod lookup;
pub mod peer;
pub mod routing;
pub mod service;
pub mod transport;

pub use config::{ConfigError, DhtConfig, LookupConfig, RoutingTableConfig};
pub use lookup::{ClosestNodesLookup, LookupResult, StopHandle, Termination};
pub use peer::KademliaPeer;
pub use routing::{KBucket, PeerDirectory, RoutingTable};
pub use service::DhtService;
pub use transport::memory::{MemoryNetwork, MemorySendQueue};
pub use transport::{ListenerRegistry, PacketDispatcher, PacketListener, SendQueue};

/// Default k value (bucket size and peers returned per query).
pub const DEFAULT_K: usize = 20;

/// Largest accepted bucket size; a full answer to a query must fit in one response.
pub const MAX_BUCKET_SIZE: usize = umbra_proto::MAX_PEERS_PER_LIST;

/// Default alpha value (maximum outstanding queries per lookup).
pub const DEFAULT_ALPHA: usize = 3;

/// Default result size of a lookup, also the number of seed peers.
pub const DEFAULT_S: usize = 20;

/// Default time after which an unanswered query marks its peer stale (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default time after which a lookup gives up with partial results (2 minutes).
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 120;

/// Default interval between two lookup ticks in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Default number of stale signals after which a peer is evicted.
pub const DEFAULT_MAX_STALE_COUNT: u32 = 5;

/// Default capacity of each in-memory endpoint's inbound queue.
pub const DEFAULT_INBOUND_QUEUE_SIZE: usize = 1024;
