// 256-bit digests used throughout the relay
//
// Block hashes, Merkle roots, Merkle leaves and vote identifiers are all
// fixed-width 256-bit values. They are compared and concatenated in big-endian
// byte order, so a digest is stored as its raw 32 bytes.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{CryptoError, CryptoResult};

/// Width of every digest handled by the relay, in bytes.
pub const HASH_LEN: usize = 32;

/// A 256-bit digest.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256([u8; HASH_LEN]);

impl Hash256 {
    /// The all-zero digest.
    pub const ZERO: Hash256 = Hash256([0u8; HASH_LEN]);

    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Hash256(bytes)
    }

    /// Build a digest from a slice, which must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let array: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength { expected: HASH_LEN, got: bytes.len() })?;
        Ok(Hash256(array))
    }

    /// Parse a hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Encode an unsigned integer as a 256-bit big-endian word.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; HASH_LEN];
        bytes[HASH_LEN - 8..].copy_from_slice(&value.to_be_bytes());
        Hash256(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    /// Return a copy with a single bit flipped. Bit 0 is the least
    /// significant bit of the last byte.
    pub fn with_bit_flipped(&self, bit: usize) -> Self {
        let mut bytes = self.0;
        let bit = bit % (HASH_LEN * 8);
        bytes[HASH_LEN - 1 - bit / 8] ^= 1 << (bit % 8);
        Hash256(bytes)
    }
}

impl From<[u8; HASH_LEN]> for Hash256 {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Hash256(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

impl FromStr for Hash256 {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash256::from_hex(s)
    }
}

// Hex strings in human-readable formats (JSON scripts, config files), raw
// bytes everywhere else (bincode snapshots).
impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Hash256::from_hex(&s).map_err(D::Error::custom)
        } else {
            <[u8; HASH_LEN]>::deserialize(deserializer).map(Hash256)
        }
    }
}

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    finish(hasher)
}

/// The pair combine rule shared by the Merkle verifier and tree builder:
/// SHA-256 over the big-endian concatenation `left ‖ right`.
pub fn combine(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    finish(hasher)
}

fn finish(hasher: Sha256) -> Hash256 {
    let hash_result = hasher.finalize();
    let mut hash = [0u8; HASH_LEN];
    hash.copy_from_slice(&hash_result);
    Hash256(hash)
}
