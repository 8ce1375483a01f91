//! Index entry deletion request.
//!
//! Asks the holders of an index packet to drop some of its entries. Each
//! entry is identified by its DHT key and authorized by a deletion token.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use umbra_core::encoding::{DecodeError, WireDecode, WireEncode};
use umbra_core::{Key, UniqueId};

use crate::error::PacketError;
use crate::header::{PacketHeader, TypeCode};

/// Maximum number of entries in one request.
pub const MAX_DELETE_ENTRIES: usize = u16::MAX as usize;

/// Request to delete entries from the index packet of one email destination.
///
/// Entries keep their insertion order; a key is present at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDeleteRequest {
    header: PacketHeader,
    email_dest_hash: Key,
    entries: Vec<(Key, UniqueId)>,
}

impl IndexDeleteRequest {
    /// Creates an empty request for the index packet of `email_dest_hash`.
    pub fn new(email_dest_hash: Key) -> Self {
        Self {
            header: PacketHeader::new(TypeCode::IndexDeleteRequest),
            email_dest_hash,
            entries: Vec::new(),
        }
    }

    /// Returns the packet header.
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Returns the hash of the email destination owning the index packet.
    pub fn email_dest_hash(&self) -> &Key {
        &self.email_dest_hash
    }

    /// Adds an entry, replacing the token of an existing entry with the same key.
    ///
    /// Returns the replaced token, if any.
    pub fn put(
        &mut self,
        dht_key: Key,
        deletion_token: UniqueId,
    ) -> Result<Option<UniqueId>, PacketError> {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == dht_key) {
            return Ok(Some(std::mem::replace(&mut entry.1, deletion_token)));
        }
        if self.entries.len() >= MAX_DELETE_ENTRIES {
            return Err(PacketError::TooManyEntries {
                max: MAX_DELETE_ENTRIES,
            });
        }
        self.entries.push((dht_key, deletion_token));
        Ok(None)
    }

    /// Removes the entry for `dht_key`, returning its token.
    pub fn remove(&mut self, dht_key: &Key) -> Option<UniqueId> {
        let pos = self.entries.iter().position(|(k, _)| k == dht_key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Returns the deletion token for `dht_key`.
    pub fn deletion_token(&self, dht_key: &Key) -> Option<&UniqueId> {
        self.entries
            .iter()
            .find(|(k, _)| k == dht_key)
            .map(|(_, token)| token)
    }

    /// Iterates over the DHT keys of all entries.
    pub fn dht_keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the request holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn decode_body(header: PacketHeader, buf: &mut Bytes) -> Result<Self, DecodeError> {
        let email_dest_hash = Key::decode(buf)?;
        let count = u16::decode(buf)? as usize;
        let mut entries: Vec<(Key, UniqueId)> = Vec::with_capacity(count);
        let mut positions: HashMap<Key, usize> = HashMap::with_capacity(count);
        for _ in 0..count {
            let dht_key = Key::decode(buf)?;
            let token = UniqueId::decode(buf)?;
            match positions.get(&dht_key) {
                Some(&pos) => entries[pos].1 = token,
                None => {
                    positions.insert(dht_key, entries.len());
                    entries.push((dht_key, token));
                }
            }
        }
        Ok(Self {
            header,
            email_dest_hash,
            entries,
        })
    }
}

impl WireEncode for IndexDeleteRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.email_dest_hash.encode(buf);
        // put caps the list at MAX_DELETE_ENTRIES, which is u16::MAX
        let count = u16::try_from(self.entries.len()).unwrap_or(u16::MAX);
        debug_assert_eq!(usize::from(count), self.entries.len());
        count.encode(buf);
        for (dht_key, token) in self.entries.iter().take(usize::from(count)) {
            dht_key.encode(buf);
            token.encode(buf);
        }
    }
}

impl WireDecode for IndexDeleteRequest {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let header = PacketHeader::decode_expecting(buf, TypeCode::IndexDeleteRequest)?;
        Self::decode_body(header, buf)
    }
}
