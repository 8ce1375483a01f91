//! Umbra Core - identifiers, destinations and wire encoding for the Umbra DHT.
//!
//! This crate provides:
//! - 32-byte keys and correlation ids
//! - Destinations (opaque peer addresses) and their derived identifiers
//! - The XOR distance metric and peer ordering
//! - Big-endian wire encoding traits
//! - SHA-256 hashing and wall-clock timestamps

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod destination;
pub mod distance;
pub mod encoding;
pub mod hash;
pub mod identifiers;
pub mod time;

pub use destination::Destination;
pub use distance::{closer_to, sort_by_distance, Distance, Identified};
pub use encoding::{DecodeError, WireDecode, WireEncode};
pub use identifiers::*;
pub use time::*;

/// Protocol version written into every packet header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum length of a destination in bytes.
pub const MAX_DESTINATION_LENGTH: usize = 1024;
