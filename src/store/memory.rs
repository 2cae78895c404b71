//! In-process store backed by hash maps behind a tokio `RwLock`

use super::{FilterHeaderStore, FilterStore, HeaderStore, StateStore};
use crate::blockchain::BlockHeaderDb;
use crate::crypto::to_hex_be;
use crate::filters::{CompactFilterDb, CompactFilterHeaderDb};
use crate::types::Hash;
use anyhow::bail;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Debug)]
struct Inner {
    headers: HashMap<Hash, BlockHeaderDb>,
    headers_by_height: BTreeMap<u32, Vec<Hash>>,
    /// Block hash -> filter header. Sibling blocks with identical filters
    /// share a filter header hash, so records are keyed by block.
    filter_headers: HashMap<Hash, CompactFilterHeaderDb>,
    /// Filter header hash -> blocks it was stored for
    filter_header_blocks: HashMap<Hash, Vec<Hash>>,
    filter_headers_by_height: BTreeMap<u32, Vec<Hash>>,
    filters: HashMap<Hash, CompactFilterDb>,
    filters_by_height: BTreeMap<u32, Vec<Hash>>,
    syncing: bool,
    ibd: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            headers_by_height: BTreeMap::new(),
            filter_headers: HashMap::new(),
            filter_header_blocks: HashMap::new(),
            filter_headers_by_height: BTreeMap::new(),
            filters: HashMap::new(),
            filters_by_height: BTreeMap::new(),
            syncing: false,
            ibd: true,
        }
    }
}

impl Inner {
    fn put_header(&mut self, header: BlockHeaderDb) {
        let hashes = self.headers_by_height.entry(header.height).or_default();
        if !hashes.contains(&header.hash) {
            hashes.push(header.hash);
        }
        self.headers.insert(header.hash, header);
    }

    fn headers_at(&self, height: u32) -> Vec<BlockHeaderDb> {
        self.headers_by_height
            .get(&height)
            .map(|hashes| hashes.iter().filter_map(|h| self.headers.get(h).cloned()).collect())
            .unwrap_or_default()
    }
}

/// Store keeping everything in memory; cloning the `Arc` around it shares
/// the data
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeaderStore for MemoryStore {
    async fn find_by_hash(&self, hash: &Hash) -> anyhow::Result<Option<BlockHeaderDb>> {
        Ok(self.inner.read().await.headers.get(hash).cloned())
    }

    async fn find_by_hashes(&self, hashes: &[Hash]) -> anyhow::Result<Vec<BlockHeaderDb>> {
        let inner = self.inner.read().await;
        Ok(hashes.iter().filter_map(|h| inner.headers.get(h).cloned()).collect())
    }

    async fn get_at_height(&self, height: u32) -> anyhow::Result<Vec<BlockHeaderDb>> {
        Ok(self.inner.read().await.headers_at(height))
    }

    async fn get_between_heights(&self, from: u32, to: u32) -> anyhow::Result<Vec<BlockHeaderDb>> {
        if from > to {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        Ok(inner
            .headers_by_height
            .range(from..=to)
            .flat_map(|(_, hashes)| hashes.iter().filter_map(|h| inner.headers.get(h).cloned()))
            .collect())
    }

    async fn create_all(&self, headers: Vec<BlockHeaderDb>) -> anyhow::Result<Vec<BlockHeaderDb>> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = headers.iter().find(|h| inner.headers.contains_key(&h.hash)) {
            bail!("header {} already stored", to_hex_be(&existing.hash));
        }
        trace!(count = headers.len(), "creating headers");
        for header in &headers {
            inner.put_header(header.clone());
        }
        Ok(headers)
    }

    async fn upsert_all(&self, headers: Vec<BlockHeaderDb>) -> anyhow::Result<Vec<BlockHeaderDb>> {
        let mut inner = self.inner.write().await;
        trace!(count = headers.len(), "upserting headers");
        for header in &headers {
            inner.put_header(header.clone());
        }
        Ok(headers)
    }

    async fn max_height(&self) -> anyhow::Result<Option<u32>> {
        Ok(self.inner.read().await.headers_by_height.keys().next_back().copied())
    }

    async fn chain_tips(&self) -> anyhow::Result<Vec<BlockHeaderDb>> {
        let inner = self.inner.read().await;
        let parents: HashSet<&Hash> = inner.headers.values().map(|h| h.prev_hash()).collect();
        let mut tips: Vec<BlockHeaderDb> = inner
            .headers
            .values()
            .filter(|h| !parents.contains(&h.hash))
            .cloned()
            .collect();
        tips.sort_by(|a, b| b.height.cmp(&a.height).then(a.hash.cmp(&b.hash)));
        Ok(tips)
    }

    async fn lowest_no_work_height(&self) -> anyhow::Result<Option<u32>> {
        let inner = self.inner.read().await;
        Ok(inner
            .headers_by_height
            .iter()
            .find(|(_, hashes)| {
                hashes
                    .iter()
                    .any(|h| inner.headers.get(h).is_some_and(|db| db.chain_work.is_zero()))
            })
            .map(|(height, _)| *height))
    }

    async fn find_closest_before_time(&self, tip: &BlockHeaderDb, time: u32) -> anyhow::Result<Option<BlockHeaderDb>> {
        let inner = self.inner.read().await;
        let mut current = inner.headers.get(&tip.hash).cloned();
        while let Some(header) = current {
            if header.timestamp() <= time {
                return Ok(Some(header));
            }
            current = inner.headers.get(header.prev_hash()).cloned();
        }
        Ok(None)
    }

    async fn header_count(&self) -> anyhow::Result<usize> {
        Ok(self.inner.read().await.headers.len())
    }
}

#[async_trait]
impl FilterHeaderStore for MemoryStore {
    async fn find_filter_header(&self, hash: &Hash) -> anyhow::Result<Option<CompactFilterHeaderDb>> {
        let inner = self.inner.read().await;
        Ok(inner
            .filter_header_blocks
            .get(hash)
            .and_then(|blocks| blocks.first())
            .and_then(|block| inner.filter_headers.get(block))
            .cloned())
    }

    async fn find_filter_header_by_block_hash(&self, block_hash: &Hash) -> anyhow::Result<Option<CompactFilterHeaderDb>> {
        Ok(self.inner.read().await.filter_headers.get(block_hash).cloned())
    }

    async fn find_filter_headers_by_block_hashes(&self, block_hashes: &[Hash]) -> anyhow::Result<Vec<CompactFilterHeaderDb>> {
        let inner = self.inner.read().await;
        Ok(block_hashes
            .iter()
            .filter_map(|b| inner.filter_headers.get(b).cloned())
            .collect())
    }

    async fn filter_headers_at_height(&self, height: u32) -> anyhow::Result<Vec<CompactFilterHeaderDb>> {
        let inner = self.inner.read().await;
        Ok(inner
            .filter_headers_by_height
            .get(&height)
            .map(|blocks| blocks.iter().filter_map(|b| inner.filter_headers.get(b).cloned()).collect())
            .unwrap_or_default())
    }

    async fn max_filter_header_height(&self) -> anyhow::Result<Option<u32>> {
        Ok(self.inner.read().await.filter_headers_by_height.keys().next_back().copied())
    }

    async fn create_all_filter_headers(
        &self,
        filter_headers: Vec<CompactFilterHeaderDb>,
    ) -> anyhow::Result<Vec<CompactFilterHeaderDb>> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = filter_headers
            .iter()
            .find(|fh| inner.filter_headers.contains_key(&fh.block_hash))
        {
            bail!("filter header for block {} already stored", to_hex_be(&existing.block_hash));
        }
        for fh in &filter_headers {
            inner.filter_header_blocks.entry(fh.hash).or_default().push(fh.block_hash);
            inner.filter_headers_by_height.entry(fh.height).or_default().push(fh.block_hash);
            inner.filter_headers.insert(fh.block_hash, fh.clone());
        }
        Ok(filter_headers)
    }
}

#[async_trait]
impl FilterStore for MemoryStore {
    async fn find_filter_by_block_hash(&self, block_hash: &Hash) -> anyhow::Result<Option<CompactFilterDb>> {
        Ok(self.inner.read().await.filters.get(block_hash).cloned())
    }

    async fn find_filters_by_block_hashes(&self, block_hashes: &[Hash]) -> anyhow::Result<Vec<CompactFilterDb>> {
        let inner = self.inner.read().await;
        Ok(block_hashes.iter().filter_map(|b| inner.filters.get(b).cloned()).collect())
    }

    async fn filters_at_height(&self, height: u32) -> anyhow::Result<Vec<CompactFilterDb>> {
        let inner = self.inner.read().await;
        Ok(inner
            .filters_by_height
            .get(&height)
            .map(|blocks| blocks.iter().filter_map(|b| inner.filters.get(b).cloned()).collect())
            .unwrap_or_default())
    }

    async fn filters_between_heights(&self, from: u32, to: u32) -> anyhow::Result<Vec<CompactFilterDb>> {
        if from > to {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        Ok(inner
            .filters_by_height
            .range(from..=to)
            .flat_map(|(_, blocks)| blocks.iter().filter_map(|b| inner.filters.get(b).cloned()))
            .collect())
    }

    async fn max_filter_height(&self) -> anyhow::Result<Option<u32>> {
        Ok(self.inner.read().await.filters_by_height.keys().next_back().copied())
    }

    async fn create_all_filters(&self, filters: Vec<CompactFilterDb>) -> anyhow::Result<Vec<CompactFilterDb>> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = filters.iter().find(|f| inner.filters.contains_key(&f.block_hash)) {
            bail!("filter for block {} already stored", to_hex_be(&existing.block_hash));
        }
        for filter in &filters {
            inner.filters_by_height.entry(filter.height).or_default().push(filter.block_hash);
            inner.filters.insert(filter.block_hash, filter.clone());
        }
        Ok(filters)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn is_syncing(&self) -> anyhow::Result<bool> {
        Ok(self.inner.read().await.syncing)
    }

    async fn set_syncing(&self, value: bool) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(std::mem::replace(&mut inner.syncing, value))
    }

    async fn is_ibd(&self) -> anyhow::Result<bool> {
        Ok(self.inner.read().await.ibd)
    }

    async fn set_ibd(&self, value: bool) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(std::mem::replace(&mut inner.ibd, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use crate::filters::{FilterHeader, FilterType};
    use crate::network::Network;
    use primitive_types::U256;

    fn linked_headers(count: u32) -> Vec<BlockHeaderDb> {
        let genesis = BlockHeaderDb::genesis(&Network::Regtest.chain_params());
        let mut headers = vec![genesis];
        for i in 1..count {
            let prev = headers.last().unwrap();
            let mut header = prev.header.clone();
            header.prev_block_hash = prev.hash;
            header.timestamp += 600;
            header.nonce = i;
            headers.push(prev.child(header));
        }
        headers
    }

    #[tokio::test]
    async fn test_create_and_query_headers() {
        let store = MemoryStore::new();
        let headers = linked_headers(5);
        store.create_all(headers.clone()).await.unwrap();

        assert_eq!(store.max_height().await.unwrap(), Some(4));
        assert_eq!(store.header_count().await.unwrap(), 5);
        assert_eq!(store.find_by_hash(&headers[2].hash).await.unwrap(), Some(headers[2].clone()));
        assert_eq!(store.get_between_heights(1, 3).await.unwrap(), headers[1..=3].to_vec());
        assert!(store.create_all(vec![headers[0].clone()]).await.is_err());
    }

    #[tokio::test]
    async fn test_chain_tips_and_blockchains() {
        let store = MemoryStore::new();
        let headers = linked_headers(4);
        store.create_all(headers.clone()).await.unwrap();

        let mut fork = headers[1].header.clone();
        fork.prev_block_hash = headers[1].hash;
        fork.nonce = 99;
        let fork_db = headers[1].child(fork);
        store.create_all(vec![fork_db.clone()]).await.unwrap();

        let tips = store.chain_tips().await.unwrap();
        assert_eq!(tips.len(), 2);
        assert_eq!(tips[0].hash, headers[3].hash);

        let chains = store.get_blockchains(10).await.unwrap();
        assert_eq!(chains.len(), 2);
        assert!(chains.iter().any(|c| c.len() == 4));
        assert!(chains.iter().any(|c| c.len() == 3 && c.tip() == Some(&fork_db)));

        let ranged = store.get_blockchains_between_heights(2, 3).await.unwrap();
        assert_eq!(ranged.len(), 2);
        let partial: Vec<Blockchain> = store.get_blockchains(2).await.unwrap();
        assert!(partial.iter().all(|c| c.len() <= 2));
    }

    #[tokio::test]
    async fn test_lowest_no_work_height() {
        let store = MemoryStore::new();
        let mut headers = linked_headers(4);
        assert_eq!(store.lowest_no_work_height().await.unwrap(), None);
        headers[2].chain_work = U256::zero();
        headers[3].chain_work = U256::zero();
        store.upsert_all(headers).await.unwrap();
        assert_eq!(store.lowest_no_work_height().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_filter_headers_and_filters() {
        let store = MemoryStore::new();
        let block = [5u8; 32];
        let filter = CompactFilterDb::new(FilterType::Basic, vec![1, 2, 3], block, 0);
        let fh = CompactFilterHeaderDb::new(FilterHeader::genesis(filter.hash), block, 0);

        store.create_all_filter_headers(vec![fh.clone()]).await.unwrap();
        store.create_all_filters(vec![filter.clone()]).await.unwrap();

        assert_eq!(store.find_filter_header(&fh.hash).await.unwrap(), Some(fh.clone()));
        assert_eq!(store.find_filter_header_by_block_hash(&block).await.unwrap(), Some(fh.clone()));
        assert_eq!(store.max_filter_header_height().await.unwrap(), Some(0));
        assert_eq!(store.filters_between_heights(0, 10).await.unwrap(), vec![filter.clone()]);
        assert!(store.create_all_filters(vec![filter]).await.is_err());
        assert!(store.create_all_filter_headers(vec![fh]).await.is_err());
    }

    #[tokio::test]
    async fn test_identical_filter_headers_on_sibling_blocks() {
        let store = MemoryStore::new();
        let (main, sibling) = ([1u8; 32], [2u8; 32]);
        let filter_header = FilterHeader {
            filter_hash: [9u8; 32],
            prev_header_hash: [8u8; 32],
        };
        let on_main = CompactFilterHeaderDb::new(filter_header, main, 1);
        let on_sibling = CompactFilterHeaderDb::new(filter_header, sibling, 1);
        assert_eq!(on_main.hash, on_sibling.hash);

        store.create_all_filter_headers(vec![on_main.clone()]).await.unwrap();
        store.create_all_filter_headers(vec![on_sibling.clone()]).await.unwrap();

        assert_eq!(store.find_filter_header_by_block_hash(&main).await.unwrap(), Some(on_main.clone()));
        assert_eq!(store.find_filter_header_by_block_hash(&sibling).await.unwrap(), Some(on_sibling.clone()));
        assert_eq!(
            store.find_filter_headers_by_block_hashes(&[main, sibling]).await.unwrap(),
            vec![on_main.clone(), on_sibling]
        );
        assert_eq!(store.filter_headers_at_height(1).await.unwrap().len(), 2);
        assert_eq!(store.find_filter_header(&on_main.hash).await.unwrap(), Some(on_main));
    }

    #[tokio::test]
    async fn test_state_flags() {
        let store = MemoryStore::new();
        assert!(!store.is_syncing().await.unwrap());
        assert!(store.is_ibd().await.unwrap());
        assert!(!store.set_syncing(true).await.unwrap());
        assert!(store.set_syncing(true).await.unwrap());
        assert!(store.set_ibd(false).await.unwrap());
        assert!(!store.is_ibd().await.unwrap());
    }
}
