//! XOR distance metric and peer ordering.
//!
//! The distance between two keys is their bitwise XOR read as a 256-bit
//! big-endian unsigned integer. Byte-wise lexicographic comparison of the
//! XOR result gives exactly that numeric order.

use std::cmp::Ordering;
use std::fmt;

use crate::destination::Destination;
use crate::identifiers::{Key, ID_LENGTH};

/// XOR distance between two keys.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Distance(pub [u8; ID_LENGTH]);

impl Distance {
    /// The distance of a key to itself.
    pub const ZERO: Distance = Distance([0u8; ID_LENGTH]);

    /// Returns true for the distance of a key to itself.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Number of leading zero bits, i.e. the length of the common prefix.
    pub fn leading_zeros(&self) -> u32 {
        let mut zeros = 0u32;
        for byte in &self.0 {
            if *byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }

    /// Returns the inner bytes.
    pub const fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Key {
    /// Computes the XOR distance to another key.
    pub fn distance(&self, other: &Key) -> Distance {
        let mut result = [0u8; ID_LENGTH];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(result)
    }
}

/// Anything that carries a DHT identifier.
pub trait Identified {
    /// Returns the identifier used for distance comparisons.
    fn key(&self) -> &Key;

    /// Distance from this item to `reference`.
    fn distance_to(&self, reference: &Key) -> Distance {
        self.key().distance(reference)
    }
}

impl Identified for Key {
    fn key(&self) -> &Key {
        self
    }
}

impl Identified for Destination {
    fn key(&self) -> &Key {
        Destination::key(self)
    }
}

impl<T: Identified + ?Sized> Identified for &T {
    fn key(&self) -> &Key {
        (**self).key()
    }
}

/// Returns a comparator ordering items by ascending distance to `reference`.
pub fn closer_to<T: Identified>(reference: Key) -> impl Fn(&T, &T) -> Ordering {
    move |a, b| a.distance_to(&reference).cmp(&b.distance_to(&reference))
}

/// Sorts `items` in place, closest to `reference` first.
pub fn sort_by_distance<T: Identified>(items: &mut [T], reference: &Key) {
    items.sort_by_cached_key(|item| item.distance_to(reference));
}
