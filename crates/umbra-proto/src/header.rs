//! Packet headers and type codes.
//!
//! Every communication packet starts with a 42-byte header:
//!
//! | Field            | Size |
//! |------------------|------|
//! | type code        | 1    |
//! | protocol version | 1    |
//! | correlation id   | 32   |
//! | sent at (ms)     | 8    |
//!
//! Data packets, which only travel embedded in a response, carry the first
//! two fields alone.

use bytes::{Buf, Bytes, BytesMut};
use umbra_core::encoding::{ensure_remaining, DecodeError, WireDecode, WireEncode};
use umbra_core::{Timestamp, UniqueId, PROTOCOL_VERSION};

/// Length of a communication packet header in bytes.
pub const HEADER_LENGTH: usize = 42;

/// Length of a data packet header in bytes.
pub const DATA_HEADER_LENGTH: usize = 2;

/// Packet type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeCode {
    /// Query for the peers closest to a key
    FindClosePeers = b'F',
    /// Response to a query
    Response = b'N',
    /// Request to delete entries from an index packet
    IndexDeleteRequest = b'X',
    /// List of peers (data packet)
    PeerList = b'L',
    /// Empty payload (data packet)
    Empty = b'E',
}

impl TypeCode {
    /// Returns the tag value.
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Creates from a tag value.
    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            b'F' => Ok(TypeCode::FindClosePeers),
            b'N' => Ok(TypeCode::Response),
            b'X' => Ok(TypeCode::IndexDeleteRequest),
            b'L' => Ok(TypeCode::PeerList),
            b'E' => Ok(TypeCode::Empty),
            _ => Err(DecodeError::UnknownTypeCode(tag)),
        }
    }

    /// Returns true for payload types that only appear inside a response.
    pub fn is_data_packet(&self) -> bool {
        matches!(self, TypeCode::PeerList | TypeCode::Empty)
    }
}

fn check_version(version: u8) -> Result<u8, DecodeError> {
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    Ok(version)
}

/// Header shared by all communication packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet type
    pub type_code: TypeCode,
    /// Protocol version
    pub version: u8,
    /// Random id; responses echo it to identify the query they answer
    pub correlation_id: UniqueId,
    /// Wall-clock send time
    pub sent_at: Timestamp,
}

impl PacketHeader {
    /// Creates a header with a fresh correlation id, stamped with the current time.
    pub fn new(type_code: TypeCode) -> Self {
        Self {
            type_code,
            version: PROTOCOL_VERSION,
            correlation_id: UniqueId::random(),
            sent_at: Timestamp::now(),
        }
    }

    /// Decodes a header and checks that it announces `expected`.
    pub fn decode_expecting(buf: &mut Bytes, expected: TypeCode) -> Result<Self, DecodeError> {
        let header = Self::decode(buf)?;
        if header.type_code != expected {
            return Err(DecodeError::UnexpectedType {
                expected: expected.tag(),
                found: header.type_code.tag(),
            });
        }
        Ok(header)
    }
}

impl WireEncode for PacketHeader {
    fn encode(&self, buf: &mut BytesMut) {
        self.type_code.tag().encode(buf);
        self.version.encode(buf);
        self.correlation_id.encode(buf);
        self.sent_at.encode(buf);
    }
}

impl WireDecode for PacketHeader {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, HEADER_LENGTH)?;
        let type_code = TypeCode::from_tag(buf.get_u8())?;
        let version = check_version(buf.get_u8())?;
        Ok(Self {
            type_code,
            version,
            correlation_id: UniqueId::decode(buf)?,
            sent_at: Timestamp::decode(buf)?,
        })
    }
}

/// Header of a data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Payload type
    pub type_code: TypeCode,
    /// Protocol version
    pub version: u8,
}

impl DataHeader {
    /// Creates a data header for the current protocol version.
    pub fn new(type_code: TypeCode) -> Self {
        Self {
            type_code,
            version: PROTOCOL_VERSION,
        }
    }
}

impl WireEncode for DataHeader {
    fn encode(&self, buf: &mut BytesMut) {
        self.type_code.tag().encode(buf);
        self.version.encode(buf);
    }
}

impl WireDecode for DataHeader {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, DATA_HEADER_LENGTH)?;
        let type_code = TypeCode::from_tag(buf.get_u8())?;
        let version = check_version(buf.get_u8())?;
        Ok(Self { type_code, version })
    }
}
