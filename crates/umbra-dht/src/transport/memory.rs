//! In-memory transport for simulated networks.
//!
//! A [`MemoryNetwork`] routes encoded datagrams between attached endpoints
//! over tokio channels. Every packet goes through the full encode/decode
//! path, so malformed input is dropped exactly as on a real transport.
//! Endpoints can be switched offline to simulate unreachable peers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use umbra_core::{Destination, Key, WireEncode};
use umbra_proto::CommunicationPacket;

use crate::transport::{ListenerRegistry, SendQueue};
use crate::DEFAULT_INBOUND_QUEUE_SIZE;

/// A datagram in flight.
#[derive(Debug)]
struct Datagram {
    sender: Destination,
    bytes: Bytes,
}

struct Endpoint {
    inbound: mpsc::Sender<Datagram>,
    online: bool,
}

#[derive(Default)]
struct NetworkInner {
    endpoints: RwLock<HashMap<Key, Endpoint>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl NetworkInner {
    fn is_online(&self, key: &Key) -> bool {
        self.endpoints
            .read()
            .get(key)
            .map(|e| e.online)
            .unwrap_or(false)
    }

    fn route(&self, datagram: Datagram, to: &Key) {
        if !self.is_online(datagram.sender.key()) {
            trace!(from = %datagram.sender, to = %to, "Sender offline, dropping datagram");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let inbound = match self.endpoints.read().get(to) {
            Some(endpoint) if endpoint.online => endpoint.inbound.clone(),
            _ => {
                trace!(from = %datagram.sender, to = %to, "Destination unreachable, dropping datagram");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match inbound.try_send(datagram) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(to = %to, error = %e, "Inbound queue unavailable, dropping datagram");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Hub connecting in-memory endpoints.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an endpoint for `local`, delivering its inbound packets to `registry`.
    ///
    /// Spawns the endpoint's receive task, so this must be called from within
    /// a tokio runtime. Attaching the same destination again replaces the
    /// previous endpoint.
    pub fn attach(&self, local: Destination, registry: Arc<ListenerRegistry>) -> MemorySendQueue {
        let (tx, mut rx) = mpsc::channel::<Datagram>(DEFAULT_INBOUND_QUEUE_SIZE);
        self.inner.endpoints.write().insert(
            *local.key(),
            Endpoint {
                inbound: tx,
                online: true,
            },
        );

        let key = *local.key();
        tokio::spawn(async move {
            while let Some(datagram) = rx.recv().await {
                registry.deliver_bytes(&datagram.bytes, &datagram.sender);
            }
            debug!(endpoint = %key, "Endpoint receive task finished");
        });

        MemorySendQueue {
            local,
            network: self.inner.clone(),
        }
    }

    /// Removes an endpoint; its receive task ends once queued datagrams are drained.
    pub fn detach(&self, key: &Key) -> bool {
        self.inner.endpoints.write().remove(key).is_some()
    }

    /// Switches an endpoint on or off. Offline endpoints neither send nor receive.
    pub fn set_online(&self, key: &Key, online: bool) {
        if let Some(endpoint) = self.inner.endpoints.write().get_mut(key) {
            endpoint.online = online;
        }
    }

    /// Returns true if the endpoint is attached and online.
    pub fn is_online(&self, key: &Key) -> bool {
        self.inner.is_online(key)
    }

    /// Returns the number of attached endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.inner.endpoints.read().len()
    }

    /// Sends raw bytes, bypassing the encoder.
    pub fn send_raw(&self, from: &Destination, to: &Key, bytes: Bytes) {
        self.inner.route(
            Datagram {
                sender: from.clone(),
                bytes,
            },
            to,
        );
    }

    /// Number of datagrams handed to an inbound queue.
    pub fn delivered_count(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Number of datagrams lost to offline or missing endpoints.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// Send queue of one attached endpoint.
#[derive(Clone)]
pub struct MemorySendQueue {
    local: Destination,
    network: Arc<NetworkInner>,
}

impl MemorySendQueue {
    /// Returns the destination packets are sent from.
    pub fn local(&self) -> &Destination {
        &self.local
    }
}

impl SendQueue for MemorySendQueue {
    fn send(&self, packet: CommunicationPacket, destination: &Destination) {
        trace!(
            from = %self.local,
            to = %destination,
            packet_type = ?packet.type_code(),
            "Sending packet"
        );
        self.network.route(
            Datagram {
                sender: self.local.clone(),
                bytes: packet.to_bytes(),
            },
            destination.key(),
        );
    }
}
