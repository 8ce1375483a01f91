//! SHA-256 hashing.
//!
//! SHA-256 is used for:
//! - Deriving a peer identifier from its destination bytes
//! - Hashing arbitrary names into DHT keys

use sha2::{Digest, Sha256};

/// Computes the SHA-256 digest of `data`.
///
/// # Example
/// ```
/// use umbra_core::hash::sha256;
///
/// let hash = sha256(b"abc");
/// assert_eq!(
///     hex::encode(hash),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
/// );
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// FIPS 180-2 test vectors
    #[test]
    fn test_sha256_known_vectors() {
        assert_eq!(
            hex::encode(sha256(&[])),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
