//! Network destinations.
//!
//! A destination is the opaque address of a peer on the anonymizing
//! transport. Its identifier is the SHA-256 hash of the raw bytes, computed
//! once when the destination is built, and all comparisons go through it.

use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::{Bytes, BytesMut};

use crate::encoding::{decode_byte_string, encode_byte_string, DecodeError, WireDecode, WireEncode};
use crate::identifiers::Key;
use crate::MAX_DESTINATION_LENGTH;

/// Length of destinations produced by [`Destination::random`].
pub const SIMULATED_DESTINATION_LENGTH: usize = 387;

/// Opaque network identity of a peer.
#[derive(Clone)]
pub struct Destination {
    bytes: Bytes,
    key: Key,
}

impl Destination {
    /// Builds a destination from raw bytes.
    ///
    /// Fails with [`DecodeError::InvalidLength`] when `bytes` is empty or
    /// longer than [`MAX_DESTINATION_LENGTH`].
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > MAX_DESTINATION_LENGTH {
            return Err(DecodeError::InvalidLength {
                field: "destination",
                length: bytes.len(),
            });
        }
        let key = Key::from_data(&bytes);
        Ok(Self { bytes, key })
    }

    /// Generates a destination from random bytes, for simulated networks.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = vec![0u8; SIMULATED_DESTINATION_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        let bytes = Bytes::from(bytes);
        let key = Key::from_data(&bytes);
        Self { bytes, key }
    }

    /// Returns the derived identifier.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Returns the raw destination bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the length of the raw destination.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; an empty destination cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for Destination {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Destination {}

impl Hash for Destination {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Destination({}, {} bytes)", self.key, self.bytes.len())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl WireEncode for Destination {
    fn encode(&self, buf: &mut BytesMut) {
        encode_byte_string(&self.bytes, buf);
    }
}

impl WireDecode for Destination {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Self::new(decode_byte_string(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_hash_of_bytes() {
        let dest = Destination::new(&b"abc"[..]).unwrap();
        assert_eq!(
            dest.key().to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(dest.len(), 3);
    }

    #[test]
    fn test_rejects_empty() {
        let err = Destination::new(Bytes::new()).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidLength {
                field: "destination",
                length: 0
            }
        );
    }

    #[test]
    fn test_rejects_oversized() {
        let bytes = vec![0x42u8; MAX_DESTINATION_LENGTH + 1];
        assert!(Destination::new(bytes).is_err());

        let bytes = vec![0x42u8; MAX_DESTINATION_LENGTH];
        assert!(Destination::new(bytes).is_ok());
    }

    #[test]
    fn test_equality_by_identifier() {
        let a = Destination::new(vec![1, 2, 3]).unwrap();
        let b = Destination::new(Bytes::from_static(&[1, 2, 3])).unwrap();
        let c = Destination::new(vec![1, 2, 4]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: std::collections::HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_wire_encoding() {
        let dest = Destination::new(vec![0xAA, 0xBB]).unwrap();
        assert_eq!(dest.to_vec(), vec![0x00, 0x02, 0xAA, 0xBB]);

        let decoded = Destination::from_bytes(&dest.to_vec()).unwrap();
        assert_eq!(decoded, dest);
        assert_eq!(decoded.as_bytes(), dest.as_bytes());
    }

    #[test]
    fn test_decode_zero_length() {
        let err = Destination::from_bytes(&[0x00, 0x00]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidLength { length: 0, .. }));
    }

    #[test]
    fn test_random_destinations() {
        let a = Destination::random();
        let b = Destination::random();
        assert_eq!(a.len(), SIMULATED_DESTINATION_LENGTH);
        assert_ne!(a, b);
    }
}
