//! Test node implementation for integration testing.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use umbra_core::{Destination, Key, Timestamp};
use umbra_dht::{
    ClosestNodesLookup, ConfigError, DhtConfig, DhtService, ListenerRegistry, LookupResult,
    MemoryNetwork, MemorySendQueue, PacketDispatcher, PacketListener, SendQueue,
};
use umbra_proto::CommunicationPacket;

/// A packet as seen by a [`PacketRecorder`].
#[derive(Debug, Clone)]
pub struct RecordedPacket {
    /// Decoded packet
    pub packet: CommunicationPacket,
    /// Sender destination
    pub sender: Destination,
    /// Local receive time
    pub received_at: Timestamp,
}

/// Listener that keeps every packet it receives.
#[derive(Debug, Default)]
pub struct PacketRecorder {
    packets: Mutex<Vec<RecordedPacket>>,
}

impl PacketRecorder {
    /// Returns a copy of everything received so far.
    pub fn packets(&self) -> Vec<RecordedPacket> {
        self.packets.lock().clone()
    }

    /// Returns the number of packets received so far.
    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    /// Returns true if nothing was received.
    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }
}

impl PacketListener for PacketRecorder {
    fn packet_received(
        &self,
        packet: &CommunicationPacket,
        sender: &Destination,
        received_at: Timestamp,
    ) {
        self.packets.lock().push(RecordedPacket {
            packet: packet.clone(),
            sender: sender.clone(),
            received_at,
        });
    }
}

/// A test node: one DHT service attached to an in-memory network.
pub struct TestNode {
    /// Node destination
    pub destination: Destination,
    /// DHT service
    service: DhtService,
    /// Inbound dispatcher fed by the network
    registry: Arc<ListenerRegistry>,
    /// Outbound queue into the network
    send_queue: Arc<MemorySendQueue>,
    /// Network the node is attached to
    network: MemoryNetwork,
}

impl TestNode {
    /// Creates a node with a fresh destination and attaches it to `network`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(network: &MemoryNetwork, config: DhtConfig) -> Result<Self, ConfigError> {
        let destination = Destination::random();
        let registry = Arc::new(ListenerRegistry::new());
        let send_queue = Arc::new(network.attach(destination.clone(), registry.clone()));
        let service = DhtService::new(
            config,
            destination.clone(),
            send_queue.clone(),
            registry.clone(),
        )?;

        debug!(node = %destination, "Test node attached");
        Ok(Self {
            destination,
            service,
            registry,
            send_queue,
            network: network.clone(),
        })
    }

    /// Returns the node's key.
    pub fn key(&self) -> &Key {
        self.destination.key()
    }

    /// Returns the DHT service.
    pub fn service(&self) -> &DhtService {
        &self.service
    }

    /// Returns the inbound dispatcher.
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Makes this node know `other`. One-directional.
    pub fn connect_to(&self, other: &TestNode) {
        self.service.add_peer(&other.destination);
    }

    /// Returns true if `other` is in this node's routing table.
    pub fn knows(&self, other: &TestNode) -> bool {
        self.service.routing_table().contains(other.key())
    }

    /// Returns the number of peers in the routing table.
    pub fn peer_count(&self) -> usize {
        self.service.routing_table().len()
    }

    /// Returns the stale counter this node holds for `other`, if it knows it.
    pub fn stale_count_of(&self, other: &TestNode) -> Option<u32> {
        self.service
            .routing_table()
            .get(other.key())
            .map(|peer| peer.stale_count())
    }

    /// Takes the node off the network or brings it back.
    pub fn set_online(&self, online: bool) {
        self.network.set_online(self.key(), online);
    }

    /// Returns true if the node sends and receives.
    pub fn is_online(&self) -> bool {
        self.network.is_online(self.key())
    }

    /// Prepares a lookup without running it.
    pub fn lookup(&self, key: Key) -> ClosestNodesLookup {
        self.service.lookup(key)
    }

    /// Runs a lookup to completion.
    pub async fn find_closest_nodes(&self, key: Key) -> LookupResult {
        self.service.lookup(key).run().await
    }

    /// Sends a packet to another node through the network.
    pub fn send(&self, packet: CommunicationPacket, to: &TestNode) {
        self.send_queue.send(packet, &to.destination);
    }

    /// Registers a recorder for every packet this node receives.
    pub fn record_packets(&self) -> Arc<PacketRecorder> {
        let recorder = Arc::new(PacketRecorder::default());
        self.registry.add_listener(recorder.clone());
        recorder
    }
}

impl std::fmt::Debug for TestNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestNode")
            .field("destination", &self.destination)
            .field("peers", &self.peer_count())
            .field("online", &self.is_online())
            .finish()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.network.detach(self.key());
    }
}
