//! Lookup packets and top-level packet decoding.
//!
//! A lookup exchanges two communication packets: [`FindClosePeersPacket`]
//! queries and [`ResponsePacket`] answers. A response embeds a
//! [`DataPacket`], itself dispatched by its own type code.

use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;
use umbra_core::encoding::{ensure_remaining, DecodeError, WireDecode, WireEncode};
use umbra_core::{Destination, Key, UniqueId, MAX_DESTINATION_LENGTH};

use crate::delete::IndexDeleteRequest;
use crate::error::PacketError;
use crate::header::{DataHeader, PacketHeader, TypeCode, DATA_HEADER_LENGTH};

/// Largest payload a response can embed; its length travels as a u16.
pub const MAX_PAYLOAD_LENGTH: usize = u16::MAX as usize;

/// Encoded length of a peer list with no entries: data header and count.
const PEER_LIST_OVERHEAD: usize = DATA_HEADER_LENGTH + 2;

/// Encoded length of a [`PeerInfo`] with a destination of maximum length.
pub const MAX_PEER_INFO_LENGTH: usize = 2 + MAX_DESTINATION_LENGTH + 4;

/// Number of peers a list can always hold, whatever their destination lengths.
pub const MAX_PEERS_PER_LIST: usize =
    (MAX_PAYLOAD_LENGTH - PEER_LIST_OVERHEAD) / MAX_PEER_INFO_LENGTH;

/// Query asking a peer for the peers it knows closest to `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindClosePeersPacket {
    /// Packet header
    pub header: PacketHeader,
    /// Lookup target
    pub key: Key,
}

impl FindClosePeersPacket {
    /// Creates a query with a fresh correlation id.
    pub fn new(key: Key) -> Self {
        Self {
            header: PacketHeader::new(TypeCode::FindClosePeers),
            key,
        }
    }

    /// Returns the correlation id a response must echo.
    pub fn correlation_id(&self) -> &UniqueId {
        &self.header.correlation_id
    }

    fn decode_body(header: PacketHeader, buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            header,
            key: Key::decode(buf)?,
        })
    }
}

impl WireEncode for FindClosePeersPacket {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.key.encode(buf);
    }
}

impl WireDecode for FindClosePeersPacket {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let header = PacketHeader::decode_expecting(buf, TypeCode::FindClosePeers)?;
        Self::decode_body(header, buf)
    }
}

/// A peer as listed in a [`PeerList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Peer destination
    pub destination: Destination,
    /// Staleness counter as known to the sender
    pub stale_count: u32,
}

impl PeerInfo {
    /// Returns the number of bytes this entry takes on the wire.
    pub fn encoded_len(&self) -> usize {
        2 + self.destination.len() + 4
    }
}

impl WireEncode for PeerInfo {
    fn encode(&self, buf: &mut BytesMut) {
        self.destination.encode(buf);
        self.stale_count.encode(buf);
    }
}

impl WireDecode for PeerInfo {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            destination: Destination::decode(buf)?,
            stale_count: u32::decode(buf)?,
        })
    }
}

/// List of peers returned in answer to a [`FindClosePeersPacket`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerList {
    peers: Vec<PeerInfo>,
}

impl PeerList {
    /// Creates a peer list.
    ///
    /// Fails when the encoded list would not fit in a response payload.
    pub fn new(peers: Vec<PeerInfo>) -> Result<Self, PacketError> {
        if peers.len() > u16::MAX as usize {
            return Err(PacketError::TooManyEntries {
                max: u16::MAX as usize,
            });
        }
        let length = PEER_LIST_OVERHEAD + peers.iter().map(PeerInfo::encoded_len).sum::<usize>();
        if length > MAX_PAYLOAD_LENGTH {
            return Err(PacketError::PayloadTooLarge {
                length,
                max: MAX_PAYLOAD_LENGTH,
            });
        }
        Ok(Self { peers })
    }

    /// Creates a peer list from the longest prefix of `peers` that fits in a
    /// response payload.
    pub fn truncated(peers: impl IntoIterator<Item = PeerInfo>) -> Self {
        let mut length = PEER_LIST_OVERHEAD;
        let mut kept = Vec::new();
        for peer in peers {
            length += peer.encoded_len();
            if length > MAX_PAYLOAD_LENGTH {
                break;
            }
            kept.push(peer);
        }
        Self { peers: kept }
    }

    /// Returns the number of bytes the list takes on the wire, data header included.
    pub fn encoded_len(&self) -> usize {
        PEER_LIST_OVERHEAD + self.peers.iter().map(PeerInfo::encoded_len).sum::<usize>()
    }

    /// Returns the listed peers.
    pub fn peers(&self) -> &[PeerInfo] {
        &self.peers
    }

    /// Consumes the list, returning the peers.
    pub fn into_peers(self) -> Vec<PeerInfo> {
        self.peers
    }

    /// Returns the number of listed peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if no peers are listed.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Payload embedded in a [`ResponsePacket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataPacket {
    /// Peers close to the queried key
    PeerList(PeerList),
    /// Nothing to report
    Empty,
}

impl DataPacket {
    /// Returns the payload type code.
    pub fn type_code(&self) -> TypeCode {
        match self {
            DataPacket::PeerList(_) => TypeCode::PeerList,
            DataPacket::Empty => TypeCode::Empty,
        }
    }
}

impl WireEncode for DataPacket {
    fn encode(&self, buf: &mut BytesMut) {
        DataHeader::new(self.type_code()).encode(buf);
        match self {
            DataPacket::PeerList(list) => list.peers.encode(buf),
            DataPacket::Empty => {}
        }
    }
}

impl WireDecode for DataPacket {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let header = DataHeader::decode(buf)?;
        match header.type_code {
            TypeCode::PeerList => Ok(DataPacket::PeerList(PeerList {
                peers: Vec::<PeerInfo>::decode(buf)?,
            })),
            TypeCode::Empty => Ok(DataPacket::Empty),
            // Communication packets never travel as a payload
            other => Err(DecodeError::UnknownTypeCode(other.tag())),
        }
    }
}

/// Answer to a query, echoing the query's correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    /// Packet header
    pub header: PacketHeader,
    /// Correlation id of the answered query
    pub request_id: UniqueId,
    /// Embedded payload
    pub payload: DataPacket,
}

impl ResponsePacket {
    /// Creates a response to the query identified by `request_id`.
    pub fn new(request_id: UniqueId, payload: DataPacket) -> Self {
        Self {
            header: PacketHeader::new(TypeCode::Response),
            request_id,
            payload,
        }
    }

    fn decode_body(header: PacketHeader, buf: &mut Bytes) -> Result<Self, DecodeError> {
        let request_id = UniqueId::decode(buf)?;
        let payload_len = u16::decode(buf)? as usize;
        ensure_remaining(buf, payload_len)?;
        let mut payload_bytes = buf.split_to(payload_len);
        let payload = DataPacket::decode(&mut payload_bytes)?;
        if payload_bytes.has_remaining() {
            warn!(
                extra = payload_bytes.remaining(),
                "Response payload has trailing bytes"
            );
        }
        Ok(Self {
            header,
            request_id,
            payload,
        })
    }
}

impl WireEncode for ResponsePacket {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.request_id.encode(buf);
        let payload = self.payload.to_bytes();
        // PeerList constructors and decoding both keep the payload within MAX_PAYLOAD_LENGTH
        debug_assert!(payload.len() <= MAX_PAYLOAD_LENGTH);
        (payload.len() as u16).encode(buf);
        buf.extend_from_slice(&payload);
    }
}

impl WireDecode for ResponsePacket {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let header = PacketHeader::decode_expecting(buf, TypeCode::Response)?;
        Self::decode_body(header, buf)
    }
}

/// Any packet that travels on its own between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunicationPacket {
    /// Closest-peers query
    FindClosePeers(FindClosePeersPacket),
    /// Answer to a query
    Response(ResponsePacket),
    /// Index entry deletion request
    IndexDeleteRequest(IndexDeleteRequest),
}

impl CommunicationPacket {
    /// Returns the packet header.
    pub fn header(&self) -> &PacketHeader {
        match self {
            CommunicationPacket::FindClosePeers(p) => &p.header,
            CommunicationPacket::Response(p) => &p.header,
            CommunicationPacket::IndexDeleteRequest(p) => p.header(),
        }
    }

    /// Returns the packet type code.
    pub fn type_code(&self) -> TypeCode {
        self.header().type_code
    }

    /// Returns the correlation id from the header.
    pub fn correlation_id(&self) -> &UniqueId {
        &self.header().correlation_id
    }
}

impl WireEncode for CommunicationPacket {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            CommunicationPacket::FindClosePeers(p) => p.encode(buf),
            CommunicationPacket::Response(p) => p.encode(buf),
            CommunicationPacket::IndexDeleteRequest(p) => p.encode(buf),
        }
    }
}

impl WireDecode for CommunicationPacket {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let header = PacketHeader::decode(buf)?;
        match header.type_code {
            TypeCode::FindClosePeers => Ok(CommunicationPacket::FindClosePeers(
                FindClosePeersPacket::decode_body(header, buf)?,
            )),
            TypeCode::Response => Ok(CommunicationPacket::Response(ResponsePacket::decode_body(
                header, buf,
            )?)),
            TypeCode::IndexDeleteRequest => Ok(CommunicationPacket::IndexDeleteRequest(
                IndexDeleteRequest::decode_body(header, buf)?,
            )),
            // Data packets only travel inside a response
            other => Err(DecodeError::UnknownTypeCode(other.tag())),
        }
    }
}

impl From<FindClosePeersPacket> for CommunicationPacket {
    fn from(packet: FindClosePeersPacket) -> Self {
        CommunicationPacket::FindClosePeers(packet)
    }
}

impl From<ResponsePacket> for CommunicationPacket {
    fn from(packet: ResponsePacket) -> Self {
        CommunicationPacket::Response(packet)
    }
}

impl From<IndexDeleteRequest> for CommunicationPacket {
    fn from(packet: IndexDeleteRequest) -> Self {
        CommunicationPacket::IndexDeleteRequest(packet)
    }
}

/// Decodes a complete datagram into a communication packet.
///
/// Bytes left over after the packet are logged and ignored.
pub fn decode_packet(datagram: &[u8]) -> Result<CommunicationPacket, DecodeError> {
    let mut buf = Bytes::copy_from_slice(datagram);
    let packet = CommunicationPacket::decode(&mut buf)?;
    if buf.has_remaining() {
        warn!(
            packet_type = %char::from(packet.type_code().tag()),
            extra = buf.remaining(),
            "Packet has trailing bytes"
        );
    }
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use umbra_core::{Timestamp, PROTOCOL_VERSION};

    use super::*;
    use crate::header::HEADER_LENGTH;

    fn fixed_header(type_code: TypeCode) -> PacketHeader {
        PacketHeader {
            type_code,
            version: PROTOCOL_VERSION,
            correlation_id: UniqueId::new([0x5A; 32]),
            sent_at: Timestamp::new(1_700_000_000_000),
        }
    }

    fn sample_peer_list() -> PeerList {
        PeerList::new(vec![
            PeerInfo {
                destination: Destination::new(vec![0xD1; 40]).unwrap(),
                stale_count: 0,
            },
            PeerInfo {
                destination: Destination::new(vec![0xD2; 387]).unwrap(),
                stale_count: 3,
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_find_close_peers_layout() {
        let packet = FindClosePeersPacket {
            header: fixed_header(TypeCode::FindClosePeers),
            key: Key::new([0x77; 32]),
        };
        let encoded = packet.to_vec();
        assert_eq!(encoded.len(), HEADER_LENGTH + 32);
        assert_eq!(encoded[0], b'F');
        assert_eq!(&encoded[HEADER_LENGTH..], &[0x77; 32]);

        let decoded = FindClosePeersPacket::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_fresh_correlation_ids() {
        let key = Key::random();
        let a = FindClosePeersPacket::new(key);
        let b = FindClosePeersPacket::new(key);
        assert_ne!(a.correlation_id(), b.correlation_id());
    }

    #[test]
    fn test_response_with_peer_list() {
        let response = ResponsePacket {
            header: fixed_header(TypeCode::Response),
            request_id: UniqueId::new([0x99; 32]),
            payload: DataPacket::PeerList(sample_peer_list()),
        };
        let encoded = response.to_vec();

        // header, echoed id, payload length, then the embedded data header
        let payload_len =
            u16::from_be_bytes([encoded[HEADER_LENGTH + 32], encoded[HEADER_LENGTH + 33]]);
        assert_eq!(payload_len as usize, encoded.len() - HEADER_LENGTH - 34);
        assert_eq!(encoded[HEADER_LENGTH + 34], b'L');

        let decoded = ResponsePacket::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, response);
        match decoded.payload {
            DataPacket::PeerList(list) => {
                assert_eq!(list.len(), 2);
                assert_eq!(list.peers()[1].stale_count, 3);
                assert_eq!(list.peers()[1].destination.len(), 387);
            }
            DataPacket::Empty => panic!("expected a peer list"),
        }
    }

    #[test]
    fn test_response_with_empty_payload() {
        let response = ResponsePacket::new(UniqueId::random(), DataPacket::Empty);
        let encoded = response.to_vec();
        assert_eq!(encoded.len(), HEADER_LENGTH + 32 + 2 + 2);
        assert_eq!(ResponsePacket::from_bytes(&encoded).unwrap(), response);
    }

    #[test]
    fn test_peer_list_layout() {
        let list = PeerList::new(vec![PeerInfo {
            destination: Destination::new(vec![0xAB, 0xCD]).unwrap(),
            stale_count: 2,
        }])
        .unwrap();
        let encoded = DataPacket::PeerList(list).to_vec();
        assert_eq!(
            encoded,
            vec![b'L', 1, 0x00, 0x01, 0x00, 0x02, 0xAB, 0xCD, 0x00, 0x00, 0x00, 0x02]
        );
    }

    #[test]
    fn test_communication_packet_dispatch() {
        let query: CommunicationPacket = FindClosePeersPacket::new(Key::random()).into();
        let decoded = decode_packet(&query.to_vec()).unwrap();
        assert_eq!(decoded, query);
        assert_eq!(decoded.type_code(), TypeCode::FindClosePeers);

        let response: CommunicationPacket =
            ResponsePacket::new(*query.correlation_id(), DataPacket::Empty).into();
        let decoded = decode_packet(&response.to_vec()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let packet: CommunicationPacket = FindClosePeersPacket::new(Key::random()).into();
        let mut encoded = packet.to_vec();
        encoded.extend_from_slice(&[0xDE, 0xAD]);
        assert_eq!(decode_packet(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_trailing_bytes_inside_payload() {
        let response = ResponsePacket {
            header: fixed_header(TypeCode::Response),
            request_id: UniqueId::new([0x01; 32]),
            payload: DataPacket::Empty,
        };
        let mut encoded = response.to_vec();
        // Grow the declared payload length by one and append the extra byte
        encoded[HEADER_LENGTH + 33] += 1;
        encoded.push(0xFF);
        assert_eq!(ResponsePacket::from_bytes(&encoded).unwrap(), response);
    }

    #[test]
    fn test_truncated_packets_fail() {
        let response = ResponsePacket::new(UniqueId::random(), DataPacket::PeerList(sample_peer_list()));
        let encoded = response.to_vec();
        for len in [0, 1, HEADER_LENGTH - 1, HEADER_LENGTH + 10, encoded.len() - 1] {
            assert!(
                decode_packet(&encoded[..len]).is_err(),
                "decoding {} of {} bytes should fail",
                len,
                encoded.len()
            );
        }
    }

    #[test]
    fn test_unknown_type_code_fails() {
        let mut encoded = FindClosePeersPacket::new(Key::random()).to_vec();
        encoded[0] = b'Q';
        assert_eq!(
            decode_packet(&encoded),
            Err(DecodeError::UnknownTypeCode(b'Q'))
        );
    }

    #[test]
    fn test_data_packet_outside_response_fails() {
        let mut encoded = FindClosePeersPacket::new(Key::random()).to_vec();
        encoded[0] = b'L';
        assert_eq!(
            decode_packet(&encoded),
            Err(DecodeError::UnknownTypeCode(b'L'))
        );
    }

    #[test]
    fn test_zero_length_destination_fails() {
        // Peer list with one entry whose destination length is zero
        let payload = [b'L', 1, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let err = DataPacket::from_bytes(&payload).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidLength { length: 0, .. }));
    }

    #[test]
    fn test_oversized_destination_fails() {
        let mut payload = vec![b'L', 1, 0x00, 0x01];
        payload.extend_from_slice(&1025u16.to_be_bytes());
        payload.extend_from_slice(&[0x42; 1025]);
        payload.extend_from_slice(&[0, 0, 0, 0]);
        let err = DataPacket::from_bytes(&payload).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidLength { length: 1025, .. }));
    }

    fn max_length_peers(count: usize) -> Vec<PeerInfo> {
        (0..count)
            .map(|i| PeerInfo {
                destination: Destination::new(vec![i as u8; MAX_DESTINATION_LENGTH]).unwrap(),
                stale_count: 0,
            })
            .collect()
    }

    #[test]
    fn test_max_peers_per_list() {
        assert_eq!(MAX_PEER_INFO_LENGTH, 1030);
        assert_eq!(MAX_PEERS_PER_LIST, 63);

        let list = PeerList::new(max_length_peers(MAX_PEERS_PER_LIST)).unwrap();
        assert!(list.encoded_len() <= MAX_PAYLOAD_LENGTH);
    }

    #[test]
    fn test_oversized_peer_list_rejected() {
        let err = PeerList::new(max_length_peers(64)).unwrap_err();
        assert_eq!(
            err,
            PacketError::PayloadTooLarge {
                length: 4 + 64 * MAX_PEER_INFO_LENGTH,
                max: MAX_PAYLOAD_LENGTH,
            }
        );
    }

    #[test]
    fn test_truncated_peer_list_fits_response() {
        let peers = max_length_peers(64);
        let list = PeerList::truncated(peers.clone());
        assert_eq!(list.len(), MAX_PEERS_PER_LIST);
        assert_eq!(list.peers(), &peers[..MAX_PEERS_PER_LIST]);

        let response = ResponsePacket::new(UniqueId::random(), DataPacket::PeerList(list));
        let bytes = response.to_bytes();
        assert_eq!(bytes.len(), HEADER_LENGTH + 32 + 2 + 4 + 63 * MAX_PEER_INFO_LENGTH);

        let decoded = decode_packet(&bytes).unwrap();
        assert_eq!(decoded, CommunicationPacket::Response(response));
    }

    #[test]
    fn test_truncated_keeps_short_lists_whole() {
        let list = PeerList::truncated(sample_peer_list().into_peers());
        assert_eq!(list, sample_peer_list());
        assert_eq!(
            list.encoded_len(),
            DataPacket::PeerList(list.clone()).to_bytes().len()
        );
    }
}
