//! Collaborator traits between the DHT and the packet transport.
//!
//! The transport is message-oriented and unreliable: [`SendQueue::send`]
//! never reports delivery, and inbound packets reach every registered
//! [`PacketListener`] in no particular order.

pub mod memory;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};
use umbra_core::{Destination, Timestamp};
use umbra_proto::{decode_packet, CommunicationPacket};

/// Outbound half of the transport.
pub trait SendQueue: Send + Sync {
    /// Queues `packet` for delivery to `destination`.
    ///
    /// Best effort: the packet may be lost without notice.
    fn send(&self, packet: CommunicationPacket, destination: &Destination);
}

/// Receiver of inbound packets.
pub trait PacketListener: Send + Sync {
    /// Called for every decoded inbound packet.
    ///
    /// May run concurrently with other calls on other tasks.
    fn packet_received(
        &self,
        packet: &CommunicationPacket,
        sender: &Destination,
        received_at: Timestamp,
    );
}

/// Inbound half of the transport: fans packets out to listeners.
pub trait PacketDispatcher: Send + Sync {
    /// Registers a listener.
    fn add_listener(&self, listener: Arc<dyn PacketListener>);

    /// Deregisters a listener previously passed to `add_listener`.
    fn remove_listener(&self, listener: &Arc<dyn PacketListener>);
}

fn same_listener(a: &Arc<dyn PacketListener>, b: &Arc<dyn PacketListener>) -> bool {
    // Compare data pointers only; vtable pointers are not unique
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Dispatcher that decodes raw datagrams and hands them to its listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn PacketListener>>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Delivers a decoded packet to every registered listener.
    ///
    /// Listeners are called on a snapshot, outside the lock, so they may
    /// register or deregister listeners themselves.
    pub fn dispatch(
        &self,
        packet: &CommunicationPacket,
        sender: &Destination,
        received_at: Timestamp,
    ) {
        let snapshot: Vec<Arc<dyn PacketListener>> = self.listeners.read().clone();
        trace!(
            sender = %sender,
            listeners = snapshot.len(),
            "Dispatching packet"
        );
        for listener in snapshot {
            listener.packet_received(packet, sender, received_at);
        }
    }

    /// Decodes a raw datagram and dispatches it.
    ///
    /// Datagrams that fail to decode are logged and dropped.
    pub fn deliver_bytes(&self, datagram: &[u8], sender: &Destination) {
        match decode_packet(datagram) {
            Ok(packet) => self.dispatch(&packet, sender, Timestamp::now()),
            Err(e) => {
                debug!(
                    sender = %sender,
                    len = datagram.len(),
                    error = %e,
                    "Dropping undecodable packet"
                );
            }
        }
    }
}

impl PacketDispatcher for ListenerRegistry {
    fn add_listener(&self, listener: Arc<dyn PacketListener>) {
        self.listeners.write().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn PacketListener>) {
        self.listeners.write().retain(|l| !same_listener(l, listener));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use umbra_core::{Key, WireEncode};
    use umbra_proto::FindClosePeersPacket;

    use super::*;

    #[derive(Default)]
    struct CountingListener {
        count: AtomicUsize,
    }

    impl PacketListener for CountingListener {
        fn packet_received(&self, _: &CommunicationPacket, _: &Destination, _: Timestamp) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_add_and_remove_listener() {
        let registry = ListenerRegistry::new();
        let a = Arc::new(CountingListener::default());
        let b = Arc::new(CountingListener::default());
        let a_dyn: Arc<dyn PacketListener> = a.clone();
        let b_dyn: Arc<dyn PacketListener> = b.clone();

        registry.add_listener(a_dyn.clone());
        registry.add_listener(b_dyn.clone());
        assert_eq!(registry.listener_count(), 2);

        let packet: CommunicationPacket = FindClosePeersPacket::new(Key::random()).into();
        let sender = Destination::random();
        registry.dispatch(&packet, &sender, Timestamp::now());
        assert_eq!(a.count.load(Ordering::SeqCst), 1);
        assert_eq!(b.count.load(Ordering::SeqCst), 1);

        registry.remove_listener(&a_dyn);
        assert_eq!(registry.listener_count(), 1);
        registry.dispatch(&packet, &sender, Timestamp::now());
        assert_eq!(a.count.load(Ordering::SeqCst), 1);
        assert_eq!(b.count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_deliver_bytes_drops_garbage() {
        let registry = ListenerRegistry::new();
        let listener = Arc::new(CountingListener::default());
        registry.add_listener(listener.clone());

        let sender = Destination::random();
        registry.deliver_bytes(&[0x46, 0x01, 0x02], &sender);
        registry.deliver_bytes(&[], &sender);
        assert_eq!(listener.count.load(Ordering::SeqCst), 0);

        let packet: CommunicationPacket = FindClosePeersPacket::new(Key::random()).into();
        registry.deliver_bytes(&packet.to_vec(), &sender);
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);
    }

    struct SelfRemovingListener {
        registry: Arc<ListenerRegistry>,
        me: RwLock<Option<Arc<dyn PacketListener>>>,
        calls: AtomicUsize,
    }

    impl PacketListener for SelfRemovingListener {
        fn packet_received(&self, _: &CommunicationPacket, _: &Destination, _: Timestamp) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = self.me.write().take() {
                self.registry.remove_listener(&me);
            }
        }
    }

    #[test]
    fn test_listener_may_deregister_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let listener = Arc::new(SelfRemovingListener {
            registry: registry.clone(),
            me: RwLock::new(None),
            calls: AtomicUsize::new(0),
        });
        let as_dyn: Arc<dyn PacketListener> = listener.clone();
        *listener.me.write() = Some(as_dyn.clone());
        registry.add_listener(as_dyn);

        let packet: CommunicationPacket = FindClosePeersPacket::new(Key::random()).into();
        let sender = Destination::random();
        registry.dispatch(&packet, &sender, Timestamp::now());
        registry.dispatch(&packet, &sender, Timestamp::now());

        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count(), 0);
    }
}
