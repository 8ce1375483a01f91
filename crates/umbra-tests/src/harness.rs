//! Test network harness for multi-node integration testing.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;
use umbra_core::{sort_by_distance, Destination, Key};
use umbra_dht::{ConfigError, DhtConfig, MemoryNetwork};

use crate::node::TestNode;

/// A test network containing multiple nodes.
pub struct TestNetwork {
    /// In-memory transport shared by all nodes
    network: MemoryNetwork,
    /// Configuration given to every new node
    config: DhtConfig,
    /// Nodes in the network
    nodes: Vec<Arc<TestNode>>,
    /// Node lookup by key
    node_map: HashMap<Key, Arc<TestNode>>,
}

impl TestNetwork {
    /// Creates a new empty test network with default node configuration.
    pub fn new() -> Self {
        Self::with_config(DhtConfig::default())
    }

    /// Creates a new empty test network whose nodes use `config`.
    pub fn with_config(config: DhtConfig) -> Self {
        Self {
            network: MemoryNetwork::new(),
            config,
            nodes: Vec::new(),
            node_map: HashMap::new(),
        }
    }

    /// Creates a test network with the specified number of nodes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_nodes(count: usize) -> Result<Self, ConfigError> {
        let mut network = Self::new();
        for _ in 0..count {
            network.add_node()?;
        }
        Ok(network)
    }

    /// Adds a new node to the network.
    pub fn add_node(&mut self) -> Result<Arc<TestNode>, ConfigError> {
        let node = Arc::new(TestNode::new(&self.network, self.config.clone())?);

        self.nodes.push(node.clone());
        self.node_map.insert(*node.key(), node.clone());

        info!(node = %node.destination, total = self.nodes.len(), "Added node to test network");
        Ok(node)
    }

    /// Returns the underlying in-memory network.
    pub fn memory(&self) -> &MemoryNetwork {
        &self.network
    }

    /// Returns the number of nodes in the network.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns all nodes in the network.
    pub fn nodes(&self) -> &[Arc<TestNode>] {
        &self.nodes
    }

    /// Returns a node by index.
    pub fn node(&self, index: usize) -> Option<&Arc<TestNode>> {
        self.nodes.get(index)
    }

    /// Returns a node by key.
    pub fn node_by_key(&self, key: &Key) -> Option<&Arc<TestNode>> {
        self.node_map.get(key)
    }

    /// Makes every node know every other node.
    pub fn connect_mesh(&self) {
        for a in &self.nodes {
            for b in &self.nodes {
                if a.key() != b.key() {
                    a.connect_to(b);
                }
            }
        }
        info!(nodes = self.nodes.len(), "Connected nodes in mesh topology");
    }

    /// Makes each node know only the next one, wrapping around.
    pub fn connect_ring(&self) {
        if self.nodes.len() < 2 {
            return;
        }
        for i in 0..self.nodes.len() {
            let next = (i + 1) % self.nodes.len();
            self.nodes[i].connect_to(&self.nodes[next]);
        }
        info!(nodes = self.nodes.len(), "Connected nodes in ring topology");
    }

    /// Makes each node know `peers_per_node` others picked with a seeded RNG.
    pub fn connect_random(&self, peers_per_node: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for (i, node) in self.nodes.iter().enumerate() {
            let others: Vec<&Arc<TestNode>> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, other)| other)
                .collect();
            for other in others.choose_multiple(&mut rng, peers_per_node) {
                node.connect_to(other);
            }
        }
        info!(
            nodes = self.nodes.len(),
            peers_per_node, seed, "Connected nodes in random topology"
        );
    }

    /// Takes the node at `index` off the network.
    pub fn set_offline(&self, index: usize) {
        if let Some(node) = self.nodes.get(index) {
            node.set_online(false);
            info!(node = %node.destination, "Node went offline");
        }
    }

    /// Returns the online nodes closest to `key` other than `requester`, closest first.
    pub fn true_closest(&self, key: &Key, requester: &Key, count: usize) -> Vec<Destination> {
        let mut online: Vec<Destination> = self
            .nodes
            .iter()
            .filter(|node| node.key() != requester && node.is_online())
            .map(|node| node.destination.clone())
            .collect();
        sort_by_distance(&mut online, key);
        online.truncate(count);
        online
    }

    /// Total number of routing table entries across all nodes.
    pub fn total_peers(&self) -> usize {
        self.nodes.iter().map(|node| node.peer_count()).sum()
    }

    /// Prints network statistics.
    pub fn print_stats(&self) {
        println!("\n=== Test Network Stats ===");
        println!("Nodes: {}", self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            println!(
                "  Node {}: {} (peers: {}, online: {})",
                i,
                node.key(),
                node.peer_count(),
                node.is_online()
            );
        }
        println!(
            "Datagrams delivered: {}, dropped: {}",
            self.network.delivered_count(),
            self.network.dropped_count()
        );
        println!("==========================\n");
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}
