//! Hash primitives: SHA256, double-SHA256, BIP340 tagged hashes and HASH160

use crate::error::{ChainError, Result};
use crate::types::Hash;
use bitcoin_hashes::{sha256d, Hash as BitcoinHash};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// All-zero 32-byte hash
pub const ZERO_HASH: Hash = [0u8; 32];

/// SHA256(data)
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// SHA256(SHA256(data)), in internal byte order
pub fn double_sha256(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}

/// BIP340 tagged hash: SHA256(SHA256(tag) || SHA256(tag) || data)
pub fn tagged_hash(tag: &str, data: &[u8]) -> Hash {
    let tag_hash = Sha256::digest(tag.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    hasher.update(data);
    hasher.finalize().into()
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// Reverse a hash between internal and display byte order
pub fn flip(hash: &Hash) -> Hash {
    let mut flipped = *hash;
    flipped.reverse();
    flipped
}

/// Hex in display (big-endian) order, as block explorers print hashes
pub fn to_hex_be(hash: &Hash) -> String {
    hex::encode(flip(hash))
}

/// Parse a display-order hex hash into internal byte order
pub fn from_hex_be(s: &str) -> Result<Hash> {
    let bytes = hex::decode(s).map_err(|e| ChainError::Serialization(format!("bad hex: {e}")))?;
    let hash: Hash = bytes
        .try_into()
        .map_err(|_| ChainError::Serialization("hash must be 32 bytes".to_string()))?;
    Ok(flip(&hash))
}
