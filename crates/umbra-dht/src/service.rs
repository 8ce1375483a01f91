//! DHT service.
//!
//! Ties a node's routing table to the transport: answers closest-peers
//! queries from other nodes, learns every sender it hears from, and runs
//! lookups on behalf of local callers.

use std::sync::Arc;

use tracing::debug;
use umbra_core::{Destination, Key, Timestamp};
use umbra_proto::{CommunicationPacket, DataPacket, FindClosePeersPacket, PeerList, ResponsePacket};

use crate::config::{ConfigError, DhtConfig};
use crate::lookup::ClosestNodesLookup;
use crate::routing::RoutingTable;
use crate::transport::{PacketDispatcher, PacketListener, SendQueue};

/// Answers closest-peers queries from the routing table.
struct QueryResponder {
    routing_table: Arc<RoutingTable>,
    send_queue: Arc<dyn SendQueue>,
    k: usize,
}

impl QueryResponder {
    fn answer(&self, query: &FindClosePeersPacket, sender: &Destination) {
        // One extra in case the requester itself is among the closest
        let peers: Vec<_> = self
            .routing_table
            .closest(&query.key, self.k + 1)
            .into_iter()
            .filter(|peer| peer.key() != sender.key())
            .take(self.k)
            .map(|peer| peer.to_info())
            .collect();

        let count = peers.len();
        let list = PeerList::truncated(peers);
        if list.len() < count {
            debug!(
                sender = %sender,
                dropped = count - list.len(),
                "Peer list truncated to fit the response payload"
            );
        }
        debug!(sender = %sender, key = %query.key, peers = list.len(), "Answering closest peers query");

        let response = ResponsePacket::new(*query.correlation_id(), DataPacket::PeerList(list));
        self.send_queue.send(response.into(), sender);
    }
}

impl PacketListener for QueryResponder {
    fn packet_received(
        &self,
        packet: &CommunicationPacket,
        sender: &Destination,
        _received_at: Timestamp,
    ) {
        match packet {
            CommunicationPacket::FindClosePeers(query) => self.answer(query, sender),
            CommunicationPacket::IndexDeleteRequest(request) => {
                debug!(
                    sender = %sender,
                    entries = request.len(),
                    "Ignoring index delete request, no index store attached"
                );
            }
            CommunicationPacket::Response(_) => {}
        }
    }
}

/// Adds every sender to the routing table and clears its staleness counter.
struct RoutingLearner {
    routing_table: Arc<RoutingTable>,
}

impl PacketListener for RoutingLearner {
    fn packet_received(
        &self,
        _packet: &CommunicationPacket,
        sender: &Destination,
        _received_at: Timestamp,
    ) {
        self.routing_table.add_or_touch(sender);
    }
}

/// DHT service providing the main interface.
pub struct DhtService {
    /// Configuration
    config: DhtConfig,
    /// Local destination
    local: Destination,
    /// Routing table
    routing_table: Arc<RoutingTable>,
    /// Outbound transport
    send_queue: Arc<dyn SendQueue>,
    /// Inbound transport
    dispatcher: Arc<dyn PacketDispatcher>,
    /// Listeners registered by this service
    listeners: Vec<Arc<dyn PacketListener>>,
}

impl DhtService {
    /// Creates a new DHT service and registers its listeners.
    pub fn new(
        config: DhtConfig,
        local: Destination,
        send_queue: Arc<dyn SendQueue>,
        dispatcher: Arc<dyn PacketDispatcher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let routing_table = Arc::new(RoutingTable::new(*local.key(), config.routing.clone()));

        let listeners: Vec<Arc<dyn PacketListener>> = vec![
            Arc::new(RoutingLearner {
                routing_table: routing_table.clone(),
            }),
            Arc::new(QueryResponder {
                routing_table: routing_table.clone(),
                send_queue: send_queue.clone(),
                k: config.routing.bucket_size,
            }),
        ];
        for listener in &listeners {
            dispatcher.add_listener(listener.clone());
        }

        Ok(Self {
            config,
            local,
            routing_table,
            send_queue,
            dispatcher,
            listeners,
        })
    }

    /// Returns the local destination.
    pub fn local(&self) -> &Destination {
        &self.local
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DhtConfig {
        &self.config
    }

    /// Returns the routing table.
    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.routing_table
    }

    /// Adds a peer to the routing table, e.g. a bootstrap peer.
    pub fn add_peer(&self, destination: &Destination) -> bool {
        self.routing_table.add_or_touch(destination)
    }

    /// Prepares a lookup for `key` without running it.
    ///
    /// Use this to get a [`crate::StopHandle`] before awaiting the lookup.
    pub fn lookup(&self, key: Key) -> ClosestNodesLookup {
        ClosestNodesLookup::new(
            key,
            self.config.lookup.clone(),
            self.send_queue.clone(),
            self.dispatcher.clone(),
            self.routing_table.clone(),
        )
    }

    /// Finds the peers closest to `key`, closest first.
    pub async fn find_closest_nodes(&self, key: Key) -> Vec<Destination> {
        self.lookup(key).run().await.peers
    }
}

impl Drop for DhtService {
    fn drop(&mut self) {
        for listener in &self.listeners {
            self.dispatcher.remove_listener(listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use umbra_core::{sort_by_distance, UniqueId, WireEncode};
    use umbra_proto::IndexDeleteRequest;

    use super::*;
    use crate::lookup::Termination;
    use crate::transport::memory::MemoryNetwork;
    use crate::transport::ListenerRegistry;

    #[derive(Default)]
    struct RecordingQueue {
        sent: Mutex<Vec<(CommunicationPacket, Destination)>>,
    }

    impl SendQueue for RecordingQueue {
        fn send(&self, packet: CommunicationPacket, destination: &Destination) {
            self.sent.lock().push((packet, destination.clone()));
        }
    }

    fn service_with_recorder() -> (DhtService, Arc<RecordingQueue>, Arc<ListenerRegistry>) {
        let queue = Arc::new(RecordingQueue::default());
        let registry = Arc::new(ListenerRegistry::new());
        let service = DhtService::new(
            DhtConfig::default(),
            Destination::random(),
            queue.clone(),
            registry.clone(),
        )
        .unwrap();
        (service, queue, registry)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = DhtConfig::default();
        config.lookup.alpha = 0;
        let result = DhtService::new(
            config,
            Destination::random(),
            Arc::new(RecordingQueue::default()),
            Arc::new(ListenerRegistry::new()),
        );
        assert!(matches!(result, Err(ConfigError::Zero("alpha"))));
    }

    #[test]
    fn test_answers_query_without_requester() {
        let (service, queue, registry) = service_with_recorder();
        let known: Vec<Destination> = (0..30).map(|_| Destination::random()).collect();
        for dest in &known {
            service.add_peer(dest);
        }
        let requester = known[0].clone();

        let query = FindClosePeersPacket::new(*requester.key());
        registry.dispatch(&query.clone().into(), &requester, Timestamp::now());

        let sent = queue.sent.lock();
        assert_eq!(sent.len(), 1);
        let (packet, to) = &sent[0];
        assert_eq!(to, &requester);
        let CommunicationPacket::Response(response) = packet else {
            panic!("expected a response, got {:?}", packet);
        };
        assert_eq!(&response.request_id, query.correlation_id());
        let DataPacket::PeerList(list) = &response.payload else {
            panic!("expected a peer list");
        };

        let listed: Vec<Destination> = list.peers().iter().map(|p| p.destination.clone()).collect();
        assert!(!listed.contains(&requester));
        assert!(listed.len() <= service.config().routing.bucket_size);

        // Same as the routing table's closest peers, minus the requester
        let mut expected: Vec<Destination> = service
            .routing_table()
            .all_peers()
            .into_iter()
            .map(|p| p.destination().clone())
            .filter(|d| d != &requester)
            .collect();
        sort_by_distance(&mut expected, requester.key());
        expected.truncate(listed.len());
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_full_answer_with_longest_destinations_encodes() {
        let mut config = DhtConfig::default();
        config.routing.bucket_size = crate::MAX_BUCKET_SIZE;
        let queue = Arc::new(RecordingQueue::default());
        let registry = Arc::new(ListenerRegistry::new());
        let service =
            DhtService::new(config, Destination::random(), queue.clone(), registry.clone()).unwrap();

        for i in 0..200u32 {
            let mut bytes = vec![0xAB; umbra_core::MAX_DESTINATION_LENGTH];
            bytes[..4].copy_from_slice(&i.to_be_bytes());
            service.add_peer(&Destination::new(bytes).unwrap());
        }
        assert!(service.routing_table().len() > crate::MAX_BUCKET_SIZE);

        let requester = Destination::random();
        let query = FindClosePeersPacket::new(Key::random());
        registry.dispatch(&query.into(), &requester, Timestamp::now());

        let sent = queue.sent.lock();
        let (packet, _) = sent
            .iter()
            .find(|(p, _)| matches!(p, CommunicationPacket::Response(_)))
            .expect("no response sent");
        let decoded = umbra_proto::decode_packet(&packet.to_bytes()).unwrap();
        let CommunicationPacket::Response(response) = decoded else {
            panic!("expected a response, got {:?}", decoded);
        };
        let DataPacket::PeerList(list) = &response.payload else {
            panic!("expected a peer list");
        };
        assert_eq!(list.len(), crate::MAX_BUCKET_SIZE);
    }

    #[test]
    fn test_learns_senders() {
        let (service, _queue, registry) = service_with_recorder();
        let sender = Destination::random();

        let request = IndexDeleteRequest::new(Key::random());
        registry.dispatch(&request.into(), &sender, Timestamp::now());
        assert!(service.routing_table().contains(sender.key()));

        let response = ResponsePacket::new(UniqueId::random(), DataPacket::Empty);
        let other = Destination::random();
        registry.dispatch(&response.into(), &other, Timestamp::now());
        assert!(service.routing_table().contains(other.key()));
    }

    #[test]
    fn test_drop_deregisters_listeners() {
        let (service, _queue, registry) = service_with_recorder();
        assert_eq!(registry.listener_count(), 2);
        drop(service);
        assert_eq!(registry.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_over_memory_network() {
        let network = MemoryNetwork::new();
        let mut services = Vec::new();
        for _ in 0..4 {
            let local = Destination::random();
            let registry = Arc::new(ListenerRegistry::new());
            let queue = Arc::new(network.attach(local.clone(), registry.clone()));
            services.push(DhtService::new(DhtConfig::default(), local, queue, registry).unwrap());
        }

        // A chain: 0 knows 1, 1 knows 2, 2 knows 3
        for i in 0..3 {
            let next = services[i + 1].local().clone();
            services[i].add_peer(&next);
        }

        let key = Key::random();
        let result = services[0].lookup(key).run().await;

        let mut expected: Vec<Destination> =
            services[1..].iter().map(|s| s.local().clone()).collect();
        sort_by_distance(&mut expected, &key);
        assert_eq!(result.peers, expected);
        assert_eq!(result.termination, Termination::Exhausted);

        // Queried nodes learned the requester
        assert!(services[3]
            .routing_table()
            .contains(services[0].local().key()));
    }
}
