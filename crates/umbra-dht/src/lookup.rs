//! Iterative closest-nodes lookup.
//!
//! A lookup starts from the peers the routing table knows closest to the
//! target key and queries them with at most `alpha` requests in flight.
//! Peers named in the answers become new candidates. The lookup ends when
//! there is nothing left to send or wait for, when enough peers answered,
//! when the global deadline passes, or when it is stopped.
//!
//! The tick loop and the inbound packet handler run independently and only
//! share three concurrent maps: responders, candidates and pending queries.
//! Moves between the maps are ordered so that a peer is never pending and
//! unqueried at once for longer than one insert, and a peer that answered
//! never becomes a candidate again.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use umbra_core::{sort_by_distance, Destination, Key, Timestamp, UniqueId};
use umbra_proto::{CommunicationPacket, DataPacket, FindClosePeersPacket, ResponsePacket};

use crate::config::LookupConfig;
use crate::peer::KademliaPeer;
use crate::routing::PeerDirectory;
use crate::transport::{PacketDispatcher, PacketListener, SendQueue};

/// Why a lookup ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No candidates left and no request outstanding
    Exhausted,
    /// Enough peers answered
    Satisfied,
    /// The global deadline passed
    TimedOut,
    /// The lookup was stopped through its [`StopHandle`]
    Stopped,
}

/// Outcome of a lookup.
#[derive(Debug, Clone)]
pub struct LookupResult {
    /// Target key
    pub key: Key,
    /// Peers that answered, closest first, at most `result_size` of them
    pub peers: Vec<Destination>,
    /// Why the lookup ended
    pub termination: Termination,
    /// Time spent in the querying phase
    pub elapsed: Duration,
}

/// Stops a running lookup from another task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    /// Makes the lookup exit at its next scheduling point with the results so far.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Returns true once `stop` was called.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// An outstanding query.
#[derive(Debug)]
struct PendingRequest {
    peer: KademliaPeer,
    packet: FindClosePeersPacket,
    sent_at: Instant,
    stale_signalled: bool,
}

/// State shared between the tick loop and the inbound handler.
struct LookupState {
    key: Key,
    /// Peers that answered, keyed by identifier
    responses: DashMap<Key, Destination>,
    /// Candidates not queried yet
    not_queried_yet: DashMap<Key, KademliaPeer>,
    /// Queried peers awaiting an answer
    pending_requests: DashMap<Key, PendingRequest>,
}

impl LookupState {
    fn new(key: Key) -> Self {
        Self {
            key,
            responses: DashMap::new(),
            not_queried_yet: DashMap::new(),
            pending_requests: DashMap::new(),
        }
    }

    /// Records an answer from `sender`.
    ///
    /// Candidates and pending requests are left alone; fan-out discards a
    /// candidate that has already answered.
    fn record_response(&self, sender: &Destination) {
        self.responses.insert(*sender.key(), sender.clone());
    }

    /// Adds a candidate unless it is pending or has answered.
    fn add_candidate(&self, peer: KademliaPeer) -> bool {
        let key = *peer.key();
        if self.is_claimed(&key) {
            return false;
        }
        self.not_queried_yet.entry(key).or_insert(peer);
        // Fan-out or a response may have claimed the peer in between
        if self.is_claimed(&key) {
            self.not_queried_yet.remove(&key);
            return false;
        }
        true
    }

    fn is_claimed(&self, key: &Key) -> bool {
        self.pending_requests.contains_key(key) || self.responses.contains_key(key)
    }

    /// Finds the pending request a response answers, by correlation id.
    fn find_request(&self, request_id: &UniqueId) -> Option<Key> {
        self.pending_requests
            .iter()
            .find(|entry| entry.packet.correlation_id() == request_id)
            .map(|entry| *entry.key())
    }

    fn results(&self, limit: usize) -> Vec<Destination> {
        let mut peers: Vec<Destination> = self
            .responses
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sort_by_distance(&mut peers, &self.key);
        peers.truncate(limit);
        peers
    }
}

/// Inbound listener registered for the lifetime of a lookup.
struct ResponseHandler {
    state: Arc<LookupState>,
}

impl ResponseHandler {
    fn handle_response(&self, response: &ResponsePacket, sender: &Destination) {
        self.state.record_response(sender);

        let DataPacket::PeerList(list) = &response.payload else {
            debug!(sender = %sender, "Response without peer list");
            return;
        };
        debug!(sender = %sender, peers = list.len(), "Peer list received");

        let Some(request_key) = self.state.find_request(&response.request_id) else {
            warn!(
                sender = %sender,
                request_id = %response.request_id,
                "No pending request matches response"
            );
            return;
        };

        let mut added = 0usize;
        for info in list.peers() {
            if self.state.add_candidate(KademliaPeer::from(info.clone())) {
                added += 1;
            }
        }
        self.state.pending_requests.remove(&request_key);
        debug!(sender = %sender, added, "Candidates updated");
    }
}

impl PacketListener for ResponseHandler {
    fn packet_received(
        &self,
        packet: &CommunicationPacket,
        sender: &Destination,
        _received_at: Timestamp,
    ) {
        if let CommunicationPacket::Response(response) = packet {
            self.handle_response(response, sender);
        }
    }
}

/// Keeps a listener registered until dropped.
struct ListenerGuard {
    dispatcher: Arc<dyn PacketDispatcher>,
    listener: Arc<dyn PacketListener>,
}

impl ListenerGuard {
    fn register(
        dispatcher: Arc<dyn PacketDispatcher>,
        listener: Arc<dyn PacketListener>,
    ) -> Self {
        dispatcher.add_listener(listener.clone());
        Self {
            dispatcher,
            listener,
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.dispatcher.remove_listener(&self.listener);
    }
}

/// A single closest-nodes lookup.
///
/// Built once per target key and consumed by [`ClosestNodesLookup::run`].
pub struct ClosestNodesLookup {
    key: Key,
    config: LookupConfig,
    state: Arc<LookupState>,
    send_queue: Arc<dyn SendQueue>,
    dispatcher: Arc<dyn PacketDispatcher>,
    directory: Arc<dyn PeerDirectory>,
    rng: StdRng,
    stop: CancellationToken,
}

impl ClosestNodesLookup {
    /// Creates a lookup for `key`.
    ///
    /// `config` is expected to have passed [`LookupConfig::validate`].
    pub fn new(
        key: Key,
        config: LookupConfig,
        send_queue: Arc<dyn SendQueue>,
        dispatcher: Arc<dyn PacketDispatcher>,
        directory: Arc<dyn PeerDirectory>,
    ) -> Self {
        Self {
            key,
            config,
            state: Arc::new(LookupState::new(key)),
            send_queue,
            dispatcher,
            directory,
            rng: StdRng::from_entropy(),
            stop: CancellationToken::new(),
        }
    }

    /// Seeds the candidate picker for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Returns the target key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Returns a handle that stops this lookup.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.stop.clone(),
        }
    }

    /// Runs the lookup to completion.
    ///
    /// Never fails: an empty result means no peers were found.
    pub async fn run(mut self) -> LookupResult {
        debug!(key = %self.key, "Looking up peers closest to key");

        let handler: Arc<dyn PacketListener> = Arc::new(ResponseHandler {
            state: self.state.clone(),
        });
        let guard = ListenerGuard::register(self.dispatcher.clone(), handler);

        let seeded = self.seed();
        let start = Instant::now();
        debug!(key = %self.key, seeded, "Seeded candidates from routing table");

        let termination = self.tick_loop(start).await;
        drop(guard);

        let peers = self.state.results(self.config.result_size);
        let elapsed = start.elapsed();
        info!(
            key = %self.key,
            found = peers.len(),
            termination = ?termination,
            elapsed = ?elapsed,
            "Closest nodes lookup finished"
        );
        for peer in &peers {
            debug!(
                key = %self.key,
                peer = %peer,
                distance = %peer.key().distance(&self.key),
                "Found peer"
            );
        }

        LookupResult {
            key: self.key,
            peers,
            termination,
            elapsed,
        }
    }

    fn seed(&self) -> usize {
        let seeds = self
            .directory
            .closest_peers(&self.key, self.config.result_size);
        let count = seeds.len();
        for peer in seeds {
            self.state.add_candidate(peer);
        }
        count
    }

    async fn tick_loop(&mut self, start: Instant) -> Termination {
        loop {
            self.fan_out();
            self.sweep_timeouts();

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    debug!(key = %self.key, "Lookup stopped");
                    return Termination::Stopped;
                }
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }

            if let Some(termination) = self.check_done(start) {
                return termination;
            }
        }
    }

    /// Sends queries until `alpha` are outstanding or no candidates remain.
    fn fan_out(&mut self) {
        while self.state.pending_requests.len() < self.config.alpha {
            let mut candidates: Vec<Key> = self
                .state
                .not_queried_yet
                .iter()
                .map(|entry| *entry.key())
                .collect();
            if candidates.is_empty() {
                return;
            }
            // Map iteration order is arbitrary; sort so a seeded picker is reproducible
            candidates.sort_unstable();
            let key = candidates[self.rng.gen_range(0..candidates.len())];

            let Some(peer) = self
                .state
                .not_queried_yet
                .get(&key)
                .map(|entry| entry.value().clone())
            else {
                continue;
            };
            if self.state.responses.contains_key(&key) {
                self.state.not_queried_yet.remove(&key);
                continue;
            }

            let packet = FindClosePeersPacket::new(self.key);
            self.state.pending_requests.insert(
                key,
                PendingRequest {
                    peer: peer.clone(),
                    packet: packet.clone(),
                    sent_at: Instant::now(),
                    stale_signalled: false,
                },
            );
            self.state.not_queried_yet.remove(&key);

            debug!(
                key = %self.key,
                peer = %peer.key(),
                request_id = %packet.correlation_id(),
                "Sending closest peers query"
            );
            self.send_queue.send(packet.into(), peer.destination());
        }
    }

    /// Signals staleness once for every request older than the request timeout.
    ///
    /// Timed-out requests stay pending.
    fn sweep_timeouts(&self) {
        let now = Instant::now();
        let mut timed_out = Vec::new();
        for mut entry in self.state.pending_requests.iter_mut() {
            if !entry.stale_signalled
                && now.duration_since(entry.sent_at) > self.config.request_timeout
            {
                entry.stale_signalled = true;
                timed_out.push(entry.peer.clone());
            }
        }

        for peer in timed_out {
            debug!(key = %self.key, peer = %peer.key(), "Query timed out, marking peer stale");
            self.directory.mark_stale(&peer);
        }
    }

    fn check_done(&self, start: Instant) -> Option<Termination> {
        if self.state.pending_requests.is_empty() && self.state.not_queried_yet.is_empty() {
            return Some(Termination::Exhausted);
        }
        if self.state.responses.len() >= self.config.result_size {
            return Some(Termination::Satisfied);
        }
        if start.elapsed() > self.config.lookup_timeout {
            warn!(
                key = %self.key,
                responses = self.state.responses.len(),
                pending = self.state.pending_requests.len(),
                "Lookup for closest peers timed out"
            );
            return Some(Termination::TimedOut);
        }
        if self.stop.is_cancelled() {
            return Some(Termination::Stopped);
        }
        None
    }
}
