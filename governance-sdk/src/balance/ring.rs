//! Hash ring primitives shared by the consistent-hash strategies
//!
//! The ring is an ordered map from 32-bit hash values to ring entries. It
//! is never mutated in place: strategies build a fresh ring off to the side
//! and swap it in wholesale.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use md5::{Digest, Md5};

/// One hash-ring entry mapping a hash value to an endpoint address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNode {
    /// Position on the ring
    pub hash: u32,

    /// Address of the endpoint owning this position
    pub address: String,
}

/// Ordered set of ring entries for one (service, method)
#[derive(Debug, Clone)]
pub struct HashRing<T> {
    entries: BTreeMap<u32, T>,
}

impl<T> Default for HashRing<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> HashRing<T> {
    /// Create an empty ring
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one entry at `hash`
    pub fn insert(&mut self, hash: u32, value: T) {
        self.entries.insert(hash, value);
    }

    /// Find the entry owning `hash`: the first entry at or clockwise of it,
    /// wrapping to the smallest entry when none is greater or equal.
    pub fn lookup(&self, hash: u32) -> Option<&T> {
        self.entries
            .range(hash..)
            .next()
            .or_else(|| self.entries.iter().next())
            .map(|(_, value)| value)
    }

    /// Number of entries on the ring
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in ring order
    pub fn iter(&self) -> impl Iterator<Item = (&u32, &T)> {
        self.entries.iter()
    }
}

/// MD5 digest of a ring key
pub fn md5_digest(input: &str) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hasher.finalize().into()
}

/// Derive the `segment`-th of four independent 32-bit values from a digest.
///
/// Bytes `[4*segment .. 4*segment+4)` composed little-endian.
pub fn hash_segment(digest: &[u8; 16], segment: usize) -> u32 {
    let base = segment * 4;
    (digest[base] as u32)
        | (digest[base + 1] as u32) << 8
        | (digest[base + 2] as u32) << 16
        | (digest[base + 3] as u32) << 24
}

/// Hash of the call key used for ring lookup
pub fn ring_position(key: &str) -> u32 {
    hash_segment(&md5_digest(key), 0)
}

/// Identity token of a candidate set, insensitive to ordering.
///
/// Cheap to recompute per call; two candidate lists carrying the same
/// addresses produce the same token, so harmless relist events never
/// trigger a ring rebuild.
pub fn identity_token<'a>(addresses: impl Iterator<Item = &'a str>) -> u64 {
    let mut sorted: Vec<&str> = addresses.collect();
    sorted.sort_unstable();
    let mut hasher = DefaultHasher::new();
    for address in sorted {
        address.hash(&mut hasher);
    }
    hasher.finish()
}
