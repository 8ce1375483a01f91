//! Wire encoding shared by every Umbra packet.
//!
//! # Encoding Rules
//!
//! - **Integers**: big-endian (network byte order)
//! - **Fixed Arrays**: bytes written consecutively without length prefix
//! - **Byte Strings**: u16 length followed by the bytes
//! - **Collections**: u16 count followed by that many self-delimiting records
//! - **Structs**: fields encoded in declaration order without padding
//!
//! Decoding never panics on untrusted input: every read checks the remaining
//! length first and reports [`DecodeError::InsufficientBytes`] on truncation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors during wire decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough bytes to decode
    #[error("Insufficient bytes: expected {expected}, got {available}")]
    InsufficientBytes {
        /// Expected number of bytes
        expected: usize,
        /// Actually available bytes
        available: usize,
    },

    /// Type code not known to this protocol version
    #[error("Unknown packet type code: 0x{0:02x}")]
    UnknownTypeCode(u8),

    /// Protocol version this node cannot parse
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// A packet of one kind appeared where another was required
    #[error("Unexpected packet type: expected 0x{expected:02x}, got 0x{found:02x}")]
    UnexpectedType {
        /// Required type code
        expected: u8,
        /// Type code found on the wire
        found: u8,
    },

    /// A length field is out of range
    #[error("Invalid length {length} for {field}")]
    InvalidLength {
        /// Field the length belongs to
        field: &'static str,
        /// Length read from the wire
        length: usize,
    },

    /// Custom decode error
    #[error("{0}")]
    Custom(String),
}

/// Trait for types that can be written to the wire.
pub trait WireEncode {
    /// Appends the wire representation to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Returns the encoded byte representation.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Returns the encoded byte representation as a Vec.
    fn to_vec(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }
}

/// Trait for types that can be read from the wire.
pub trait WireDecode: Sized {
    /// Decodes a value, advancing `buf` past the consumed bytes.
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError>;

    /// Decodes from a byte slice, ignoring any trailing bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = Bytes::copy_from_slice(bytes);
        Self::decode(&mut buf)
    }
}

/// Fails with [`DecodeError::InsufficientBytes`] unless `buf` holds `needed` bytes.
#[inline]
pub fn ensure_remaining(buf: &Bytes, needed: usize) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::InsufficientBytes {
            expected: needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

// ============================================================================
// Primitive implementations
// ============================================================================

impl WireEncode for u8 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }
}

impl WireDecode for u8 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, 1)?;
        Ok(buf.get_u8())
    }
}

impl WireEncode for u16 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(*self);
    }
}

impl WireDecode for u16 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, 2)?;
        Ok(buf.get_u16())
    }
}

impl WireEncode for u32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(*self);
    }
}

impl WireDecode for u32 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, 4)?;
        Ok(buf.get_u32())
    }
}

impl WireEncode for u64 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(*self);
    }
}

impl WireDecode for u64 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, 8)?;
        Ok(buf.get_u64())
    }
}

// ============================================================================
// Fixed array implementations
// ============================================================================

impl<const N: usize> WireEncode for [u8; N] {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self);
    }
}

impl<const N: usize> WireDecode for [u8; N] {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, N)?;
        let mut arr = [0u8; N];
        buf.copy_to_slice(&mut arr);
        Ok(arr)
    }
}

// ============================================================================
// Collections and byte strings
// ============================================================================

impl<T: WireEncode> WireEncode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        let len = self.len();
        assert!(
            len <= u16::MAX as usize,
            "Collection length exceeds u16::MAX"
        );
        (len as u16).encode(buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let len = u16::decode(buf)? as usize;
        let mut vec = Vec::with_capacity(len);
        for _ in 0..len {
            vec.push(T::decode(buf)?);
        }
        Ok(vec)
    }
}

/// Writes a u16-length-prefixed byte string.
pub fn encode_byte_string(bytes: &[u8], buf: &mut BytesMut) {
    assert!(
        bytes.len() <= u16::MAX as usize,
        "Byte string length exceeds u16::MAX"
    );
    (bytes.len() as u16).encode(buf);
    buf.put_slice(bytes);
}

/// Reads a u16-length-prefixed byte string without copying.
pub fn decode_byte_string(buf: &mut Bytes) -> Result<Bytes, DecodeError> {
    let len = u16::decode(buf)? as usize;
    ensure_remaining(buf, len)?;
    Ok(buf.split_to(len))
}
