//! Umbra Protocol - packets exchanged between Umbra DHT peers.
//!
//! This crate defines:
//! - The communication packet header and type codes
//! - Closest-peers queries and their responses
//! - Data packets embedded in responses (peer list, empty)
//! - The index entry deletion request
//! - Top-level datagram decoding

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod delete;
pub mod error;
pub mod header;
pub mod messages;

pub use delete::IndexDeleteRequest;
pub use error::PacketError;
pub use header::{DataHeader, PacketHeader, TypeCode, DATA_HEADER_LENGTH, HEADER_LENGTH};
pub use messages::{
    decode_packet, CommunicationPacket, DataPacket, FindClosePeersPacket, PeerInfo, PeerList,
    ResponsePacket, MAX_PAYLOAD_LENGTH, MAX_PEERS_PER_LIST, MAX_PEER_INFO_LENGTH,
};
