//! Persistence interfaces for headers, filter headers, filters and sync
//! state. Implementations report failures as `anyhow` errors; the chain
//! handler wraps them in [`ChainError::Store`](crate::error::ChainError::Store).

use crate::blockchain::{BlockHeaderDb, Blockchain};
use crate::filters::{CompactFilterDb, CompactFilterHeaderDb};
use crate::types::{BlockHeader, Hash};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

pub mod memory;
pub use memory::MemoryStore;

/// Block header persistence
#[async_trait]
pub trait HeaderStore: Send + Sync {
    async fn find_by_hash(&self, hash: &Hash) -> anyhow::Result<Option<BlockHeaderDb>>;

    /// Headers for the hashes that are stored, in request order
    async fn find_by_hashes(&self, hashes: &[Hash]) -> anyhow::Result<Vec<BlockHeaderDb>>;

    async fn get_at_height(&self, height: u32) -> anyhow::Result<Vec<BlockHeaderDb>>;

    /// Headers with `from <= height <= to`, ascending by height
    async fn get_between_heights(&self, from: u32, to: u32) -> anyhow::Result<Vec<BlockHeaderDb>>;

    /// Insert new headers; fails if any hash is already stored
    async fn create_all(&self, headers: Vec<BlockHeaderDb>) -> anyhow::Result<Vec<BlockHeaderDb>>;

    /// Insert or replace headers by hash
    async fn upsert_all(&self, headers: Vec<BlockHeaderDb>) -> anyhow::Result<Vec<BlockHeaderDb>>;

    async fn max_height(&self) -> anyhow::Result<Option<u32>>;

    /// Headers no stored header builds on
    async fn chain_tips(&self) -> anyhow::Result<Vec<BlockHeaderDb>>;

    /// Lowest height holding a header with zero chain work
    async fn lowest_no_work_height(&self) -> anyhow::Result<Option<u32>>;

    /// Last header at or before `time` on the chain ending at `tip`
    async fn find_closest_before_time(&self, tip: &BlockHeaderDb, time: u32) -> anyhow::Result<Option<BlockHeaderDb>>;

    async fn header_count(&self) -> anyhow::Result<usize>;

    /// One chain per tip, each holding at most `depth` headers
    async fn get_blockchains(&self, depth: usize) -> anyhow::Result<Vec<Blockchain>> {
        let tips = self.chain_tips().await?;
        let mut chains = Vec::with_capacity(tips.len());
        for tip in tips {
            let from = tip.height.saturating_sub(depth.saturating_sub(1) as u32);
            let headers = self.get_between_heights(from, tip.height).await?;
            let by_hash: HashMap<Hash, BlockHeaderDb> = headers.into_iter().map(|h| (h.hash, h)).collect();
            chains.push(Blockchain::walk_back(tip, &by_hash, depth));
        }
        Ok(chains)
    }

    /// Chains formed by the headers between two heights, one per header in
    /// the range that has no child in the range
    async fn get_blockchains_between_heights(&self, from: u32, to: u32) -> anyhow::Result<Vec<Blockchain>> {
        let headers = self.get_between_heights(from, to).await?;
        let parents: HashSet<Hash> = headers.iter().map(|h| *h.prev_hash()).collect();
        let by_hash: HashMap<Hash, BlockHeaderDb> = headers.iter().map(|h| (h.hash, h.clone())).collect();
        let max_len = (to.saturating_sub(from) as usize) + 1;
        Ok(headers
            .iter()
            .filter(|h| !parents.contains(&h.hash))
            .map(|tip| Blockchain::walk_back(tip.clone(), &by_hash, max_len))
            .collect())
    }

    /// Chain ending at `hash` with at most `depth` headers
    async fn get_blockchain_from(&self, hash: &Hash, depth: usize) -> anyhow::Result<Option<Blockchain>> {
        let Some(tip) = self.find_by_hash(hash).await? else {
            return Ok(None);
        };
        let from = tip.height.saturating_sub(depth.saturating_sub(1) as u32);
        let headers = self.get_between_heights(from, tip.height).await?;
        let by_hash: HashMap<Hash, BlockHeaderDb> = headers.into_iter().map(|h| (h.hash, h)).collect();
        Ok(Some(Blockchain::walk_back(tip, &by_hash, depth)))
    }
}

/// BIP157 filter header persistence
#[async_trait]
pub trait FilterHeaderStore: Send + Sync {
    async fn find_filter_header(&self, hash: &Hash) -> anyhow::Result<Option<CompactFilterHeaderDb>>;

    async fn find_filter_header_by_block_hash(&self, block_hash: &Hash) -> anyhow::Result<Option<CompactFilterHeaderDb>>;

    async fn find_filter_headers_by_block_hashes(&self, block_hashes: &[Hash]) -> anyhow::Result<Vec<CompactFilterHeaderDb>>;

    async fn filter_headers_at_height(&self, height: u32) -> anyhow::Result<Vec<CompactFilterHeaderDb>>;

    async fn max_filter_header_height(&self) -> anyhow::Result<Option<u32>>;

    async fn create_all_filter_headers(
        &self,
        filter_headers: Vec<CompactFilterHeaderDb>,
    ) -> anyhow::Result<Vec<CompactFilterHeaderDb>>;
}

/// BIP158 filter persistence
#[async_trait]
pub trait FilterStore: Send + Sync {
    async fn find_filter_by_block_hash(&self, block_hash: &Hash) -> anyhow::Result<Option<CompactFilterDb>>;

    async fn find_filters_by_block_hashes(&self, block_hashes: &[Hash]) -> anyhow::Result<Vec<CompactFilterDb>>;

    async fn filters_at_height(&self, height: u32) -> anyhow::Result<Vec<CompactFilterDb>>;

    /// Filters with `from <= height <= to`, ascending by height
    async fn filters_between_heights(&self, from: u32, to: u32) -> anyhow::Result<Vec<CompactFilterDb>>;

    async fn max_filter_height(&self) -> anyhow::Result<Option<u32>>;

    async fn create_all_filters(&self, filters: Vec<CompactFilterDb>) -> anyhow::Result<Vec<CompactFilterDb>>;
}

/// Sync flags shared by every handler over the same store
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn is_syncing(&self) -> anyhow::Result<bool>;

    /// Store the flag, returning the previous value
    async fn set_syncing(&self, value: bool) -> anyhow::Result<bool>;

    async fn is_ibd(&self) -> anyhow::Result<bool>;

    /// Store the flag, returning the previous value
    async fn set_ibd(&self, value: bool) -> anyhow::Result<bool>;
}

/// Everything the chain handler persists
pub trait ChainStore: HeaderStore + FilterHeaderStore + FilterStore + StateStore {}

impl<T> ChainStore for T where T: HeaderStore + FilterHeaderStore + FilterStore + StateStore {}

/// Remote provider of block headers, e.g. a full node
#[async_trait]
pub trait HeaderSource: Send + Sync {
    async fn get_best_block_hash(&self) -> anyhow::Result<Hash>;

    async fn get_block_header(&self, hash: &Hash) -> anyhow::Result<Option<BlockHeader>>;
}
