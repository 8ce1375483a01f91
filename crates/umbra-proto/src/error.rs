//! Packet construction errors.

use thiserror::Error;
use umbra_core::DecodeError;

/// Errors building or parsing packets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// The bytes are not a valid packet
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A collection would exceed what its u16 count field can express
    #[error("Too many entries: at most {max} allowed")]
    TooManyEntries {
        /// Maximum number of entries
        max: usize,
    },

    /// An embedded payload would exceed what its u16 length field can express
    #[error("Payload of {length} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Encoded length of the payload
        length: usize,
        /// Maximum payload length
        max: usize,
    },
}
