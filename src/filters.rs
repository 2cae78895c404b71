//! BIP157/158 compact block filters and filter headers

use crate::crypto::{double_sha256, to_hex_be, ZERO_HASH};
use crate::types::{ByteString, Hash};
use serde::{Deserialize, Serialize};

/// Filter type code carried in BIP157 messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterType {
    Basic,
}

impl FilterType {
    pub fn code(&self) -> u8 {
        match self {
            FilterType::Basic => 0x00,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(FilterType::Basic),
            _ => None,
        }
    }
}

/// Filter hash of serialized filter bytes
pub fn filter_hash(bytes: &[u8]) -> Hash {
    double_sha256(bytes)
}

/// One link of the filter-header chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterHeader {
    pub filter_hash: Hash,
    pub prev_header_hash: Hash,
}

impl FilterHeader {
    /// double-SHA256(filter_hash ‖ prev_header_hash)
    pub fn hash(&self) -> Hash {
        let mut data = [0u8; 64];
        data[..32].copy_from_slice(&self.filter_hash);
        data[32..].copy_from_slice(&self.prev_header_hash);
        double_sha256(&data)
    }

    /// Header following this one for the filter with `next_filter_hash`
    pub fn next_header(&self, next_filter_hash: Hash) -> FilterHeader {
        FilterHeader {
            filter_hash: next_filter_hash,
            prev_header_hash: self.hash(),
        }
    }

    /// Filter header of the genesis block
    pub fn genesis(filter_hash: Hash) -> FilterHeader {
        FilterHeader {
            filter_hash,
            prev_header_hash: ZERO_HASH,
        }
    }
}

/// Filter header as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactFilterHeaderDb {
    pub hash: Hash,
    pub filter_hash: Hash,
    pub previous_filter_header: Hash,
    pub block_hash: Hash,
    pub height: u32,
}

impl CompactFilterHeaderDb {
    pub fn new(filter_header: FilterHeader, block_hash: Hash, height: u32) -> Self {
        Self {
            hash: filter_header.hash(),
            filter_hash: filter_header.filter_hash,
            previous_filter_header: filter_header.prev_header_hash,
            block_hash,
            height,
        }
    }

    pub fn filter_header(&self) -> FilterHeader {
        FilterHeader {
            filter_hash: self.filter_hash,
            prev_header_hash: self.previous_filter_header,
        }
    }

    /// Stored hash matches the hash of its own contents
    pub fn is_consistent(&self) -> bool {
        self.filter_header().hash() == self.hash
    }
}

impl std::fmt::Display for CompactFilterHeaderDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "filter header {} at height {} (block {})",
            to_hex_be(&self.hash),
            self.height,
            to_hex_be(&self.block_hash)
        )
    }
}

/// Filter as persisted. `hash` is always `filter_hash(bytes)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactFilterDb {
    pub hash: Hash,
    pub filter_type: FilterType,
    pub bytes: ByteString,
    pub height: u32,
    pub block_hash: Hash,
}

impl CompactFilterDb {
    pub fn new(filter_type: FilterType, bytes: ByteString, block_hash: Hash, height: u32) -> Self {
        Self {
            hash: filter_hash(&bytes),
            filter_type,
            bytes,
            height,
            block_hash,
        }
    }
}

/// BIP157 `cfilter` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactFilterMessage {
    pub filter_type: FilterType,
    pub block_hash: Hash,
    pub filter_bytes: ByteString,
}

impl CompactFilterMessage {
    pub fn filter_hash(&self) -> Hash {
        filter_hash(&self.filter_bytes)
    }
}

/// BIP157 `cfheaders` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactFilterHeadersMessage {
    pub filter_type: FilterType,
    pub stop_hash: Hash,
    pub previous_filter_header: Hash,
    pub filter_hashes: Vec<Hash>,
}

impl CompactFilterHeadersMessage {
    /// Filter headers chained from `previous_filter_header`, oldest first
    pub fn filter_headers(&self) -> Vec<FilterHeader> {
        let mut prev = self.previous_filter_header;
        self.filter_hashes
            .iter()
            .map(|filter_hash| {
                let header = FilterHeader {
                    filter_hash: *filter_hash,
                    prev_header_hash: prev,
                };
                prev = header.hash();
                header
            })
            .collect()
    }
}

/// Next range to request: from `start_height` up to `stop_block_hash`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSyncMarker {
    pub start_height: u32,
    pub stop_block_hash: Hash,
}

impl std::fmt::Display for FilterSyncMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FilterSyncMarker(start_height={}, stop_block_hash={})",
            self.start_height,
            to_hex_be(&self.stop_block_hash)
        )
    }
}

/// A stored filter with the block it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterResponse {
    pub filter_bytes: ByteString,
    pub block_hash: Hash,
    pub block_height: u32,
}

impl From<CompactFilterDb> for FilterResponse {
    fn from(db: CompactFilterDb) -> Self {
        Self {
            filter_bytes: db.bytes,
            block_hash: db.block_hash,
            block_height: db.height,
        }
    }
}

/// A point in the chain named by height, block hash or time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStamp {
    Height(u32),
    Hash(Hash),
    /// Unix time; resolves to the last header mined at or before it
    Time(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_header_hash_layout() {
        let header = FilterHeader {
            filter_hash: [1u8; 32],
            prev_header_hash: [2u8; 32],
        };
        let mut data = vec![1u8; 32];
        data.extend([2u8; 32]);
        assert_eq!(header.hash(), double_sha256(&data));
    }

    #[test]
    fn test_next_header_links() {
        let genesis = FilterHeader::genesis([7u8; 32]);
        assert_eq!(genesis.prev_header_hash, ZERO_HASH);
        let next = genesis.next_header([8u8; 32]);
        assert_eq!(next.prev_header_hash, genesis.hash());
    }

    #[test]
    fn test_cfheaders_chain() {
        let msg = CompactFilterHeadersMessage {
            filter_type: FilterType::Basic,
            stop_hash: [0u8; 32],
            previous_filter_header: [9u8; 32],
            filter_hashes: vec![[1u8; 32], [2u8; 32], [3u8; 32]],
        };
        let headers = msg.filter_headers();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].prev_header_hash, [9u8; 32]);
        assert_eq!(headers[2].prev_header_hash, headers[1].hash());
    }

    #[test]
    fn test_filter_db_hash() {
        let db = CompactFilterDb::new(FilterType::Basic, vec![0x01, 0x02], [0u8; 32], 5);
        assert_eq!(db.hash, double_sha256(&[0x01, 0x02]));
        let header_db = CompactFilterHeaderDb::new(FilterHeader::genesis(db.hash), [0u8; 32], 0);
        assert!(header_db.is_consistent());
        assert_eq!(FilterType::from_code(FilterType::Basic.code()), Some(FilterType::Basic));
    }
}
