//! 32-byte identifier types.
//!
//! - `Key` - DHT key and peer identifier, usually a SHA-256 hash
//! - `UniqueId` - random correlation id carried in every communication packet

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::encoding::{DecodeError, WireDecode, WireEncode};
use crate::hash::sha256;

/// Length in bytes of every identifier type.
pub const ID_LENGTH: usize = 32;

/// Macro to define a 32-byte identifier type with common implementations.
macro_rules! define_id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; ID_LENGTH]);

        impl $name {
            /// Creates a new identifier from a 32-byte array.
            pub const fn new(bytes: [u8; ID_LENGTH]) -> Self {
                Self(bytes)
            }

            /// Creates a zero identifier.
            pub const fn zero() -> Self {
                Self([0u8; ID_LENGTH])
            }

            /// Generates a random identifier.
            pub fn random() -> Self {
                use rand::RngCore;
                let mut bytes = [0u8; ID_LENGTH];
                rand::thread_rng().fill_bytes(&mut bytes);
                Self(bytes)
            }

            /// Returns the inner bytes.
            pub const fn as_bytes(&self) -> &[u8; ID_LENGTH] {
                &self.0
            }

            /// Returns the inner bytes as a slice.
            pub fn as_slice(&self) -> &[u8] {
                &self.0
            }

            /// Creates from a hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                if bytes.len() != ID_LENGTH {
                    return Err(hex::FromHexError::InvalidStringLength);
                }
                let mut arr = [0u8; ID_LENGTH];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }

            /// Returns as a hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl From<[u8; ID_LENGTH]> for $name {
            fn from(bytes: [u8; ID_LENGTH]) -> Self {
                Self(bytes)
            }
        }

        impl From<$name> for [u8; ID_LENGTH] {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl WireEncode for $name {
            fn encode(&self, buf: &mut BytesMut) {
                self.0.encode(buf);
            }
        }

        impl WireDecode for $name {
            fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
                Ok(Self(<[u8; ID_LENGTH]>::decode(buf)?))
            }
        }
    };
}

define_id_type!(
    /// DHT key, also used as the identifier of a peer.
    ///
    /// A peer's key is the SHA-256 hash of its destination bytes.
    Key
);

define_id_type!(
    /// Random per-packet correlation id.
    ///
    /// A response echoes the id of the query it answers.
    UniqueId
);

impl Key {
    /// Derives a key by hashing arbitrary bytes.
    pub fn from_data(data: &[u8]) -> Self {
        Self(sha256(data))
    }
}
