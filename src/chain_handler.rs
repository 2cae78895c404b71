//! Headers and compact-filter chain handler
//!
//! A [`ChainHandler`] is an immutable snapshot: the candidate chains it holds
//! in memory plus handles to the shared store and callback dispatcher. Every
//! operation that changes chain state returns a new snapshot. Events from the
//! process operations are dispatched while the writer lock is held, so
//! callbacks see them in commit order.
//!
//! Writers serialize on a mutex shared by all snapshots of one handler. Each
//! committed header write bumps a shared generation counter; a snapshot whose
//! generation is behind reloads its candidate chains from the store before
//! connecting anything, so a write made through an older snapshot never
//! loses a header another snapshot already connected.

use crate::blockchain::{best_tip, connect_headers_to_chains, BlockHeaderDb, Blockchain, BlockchainUpdate};
use crate::callbacks::{CallbackDispatcher, CallbackRegistry, ChainEvent};
use crate::config::ChainConfig;
use crate::constants::{FILTER_CHECKPOINT_INTERVAL, MAX_HEADERS_PER_MESSAGE, MEDIAN_TIME_SPAN};
use crate::crypto::{to_hex_be, ZERO_HASH};
use crate::error::{ChainError, Result};
use crate::filters::{
    BlockStamp, CompactFilterDb, CompactFilterHeaderDb, CompactFilterMessage, FilterHeader, FilterResponse,
    FilterSyncMarker,
};
use crate::network::ChainParams;
use crate::pow::block_proof;
use crate::store::{ChainStore, HeaderSource};
use crate::types::{BlockHeader, Hash};
use primitive_types::U256;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Coarse view of where header sync stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Nothing beyond the genesis header is stored
    NoHeaders,
    Syncing,
    Synced,
    /// Two or more candidate tips carry the same, maximal chain work
    ReorgDetected,
}

pub struct ChainHandler<S: ChainStore> {
    store: Arc<S>,
    config: ChainConfig,
    params: ChainParams,
    blockchains: Vec<Blockchain>,
    /// Block hash -> expected filter header hash
    filter_checkpoints: HashMap<Hash, Hash>,
    callbacks: CallbackDispatcher,
    writer: Arc<Mutex<()>>,
    generation: Arc<AtomicU64>,
    snapshot_generation: u64,
}

impl<S: ChainStore> Clone for ChainHandler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            params: self.params.clone(),
            blockchains: self.blockchains.clone(),
            filter_checkpoints: self.filter_checkpoints.clone(),
            callbacks: self.callbacks.clone(),
            writer: Arc::clone(&self.writer),
            generation: Arc::clone(&self.generation),
            snapshot_generation: self.snapshot_generation,
        }
    }
}

impl<S: ChainStore> std::fmt::Debug for ChainHandler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tips: Vec<String> = self
            .blockchains
            .iter()
            .filter_map(Blockchain::tip)
            .map(|tip| format!("{}@{}", to_hex_be(&tip.hash), tip.height))
            .collect();
        f.debug_struct("ChainHandler")
            .field("network", &self.config.network)
            .field("tips", &tips)
            .field("filter_checkpoints", &self.filter_checkpoints.len())
            .field("generation", &self.snapshot_generation)
            .finish()
    }
}

impl<S: ChainStore> ChainHandler<S> {
    /// Open a handler over `store`, seeding the genesis header into an
    /// empty store. Callbacks run on a single task spawned on `executor`.
    pub async fn from_store(
        store: Arc<S>,
        config: ChainConfig,
        callbacks: CallbackRegistry,
        executor: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let params = config.chain_params();
        let genesis = BlockHeaderDb::genesis(&params);

        let at_zero = store.get_at_height(0).await?;
        if store.max_height().await?.is_none() {
            info!(network = %config.network, hash = %to_hex_be(&genesis.hash), "seeding genesis header");
            store.create_all(vec![genesis]).await?;
        } else if !at_zero.is_empty() && !at_zero.iter().any(|h| h.hash == genesis.hash) {
            return Err(ChainError::Config(format!(
                "store genesis does not match {} genesis {}",
                config.network,
                to_hex_be(&genesis.hash)
            )));
        }

        let blockchains = store.get_blockchains(config.chain_cache_depth).await?;
        debug!(chains = blockchains.len(), "loaded candidate chains");

        Ok(Self {
            store,
            config,
            params,
            blockchains,
            filter_checkpoints: HashMap::new(),
            callbacks: CallbackDispatcher::spawn(callbacks, &executor),
            writer: Arc::new(Mutex::new(())),
            generation: Arc::new(AtomicU64::new(0)),
            snapshot_generation: 0,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Candidate chains held by this snapshot
    pub fn blockchains(&self) -> &[Blockchain] {
        &self.blockchains
    }

    pub fn filter_checkpoints(&self) -> &HashMap<Hash, Hash> {
        &self.filter_checkpoints
    }

    /// Whether another snapshot has committed headers since this one
    pub fn is_stale(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != self.snapshot_generation
    }

    async fn current_chains(&self) -> Result<Vec<Blockchain>> {
        if !self.is_stale() {
            return Ok(self.blockchains.clone());
        }
        debug!(generation = self.snapshot_generation, "snapshot is stale, reloading chains from store");
        Ok(self.store.get_blockchains(self.config.chain_cache_depth).await?)
    }

    /// New snapshot holding `blockchains`. Callers hold the writer lock.
    fn commit(&self, blockchains: Vec<Blockchain>) -> Self {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            blockchains,
            snapshot_generation: generation,
            ..self.clone()
        }
    }

    /// ProcessHeaders: ℋ* → ChainHandler
    ///
    /// 1. Drop headers repeated in the batch or already known
    /// 2. Load the stored chain of any parent missing from memory
    /// 3. Connect the rest to every candidate chain
    /// 4. Persist what connected and fire header callbacks
    pub async fn process_headers(&self, headers: &[BlockHeader]) -> Result<Self> {
        if headers.is_empty() {
            return Ok(self.clone());
        }
        let _guard = self.writer.lock().await;
        let mut chains = self.current_chains().await?;

        let mut seen = HashSet::new();
        let unseen: Vec<(Hash, &BlockHeader)> = headers
            .iter()
            .map(|h| (h.hash(), h))
            .filter(|(hash, _)| seen.insert(*hash))
            .filter(|(hash, _)| !chains.iter().any(|c| c.contains(hash)))
            .collect();
        let hashes: Vec<Hash> = unseen.iter().map(|(hash, _)| *hash).collect();
        let stored: HashSet<Hash> = self
            .store
            .find_by_hashes(&hashes)
            .await?
            .into_iter()
            .map(|h| h.hash)
            .collect();
        let new_headers: Vec<BlockHeader> = unseen
            .into_iter()
            .filter(|(hash, _)| !stored.contains(hash))
            .map(|(_, header)| header.clone())
            .collect();
        if new_headers.is_empty() {
            return Err(ChainError::DuplicateHeaders(format!(
                "all {} headers already known",
                headers.len()
            )));
        }

        let batch: HashSet<Hash> = new_headers.iter().map(BlockHeader::hash).collect();
        let mut loaded = HashSet::new();
        for header in &new_headers {
            let parent = header.prev_block_hash;
            if batch.contains(&parent) || chains.iter().any(|c| c.contains(&parent)) || !loaded.insert(parent) {
                continue;
            }
            if let Some(chain) = self
                .store
                .get_blockchain_from(&parent, self.config.chain_cache_depth)
                .await?
            {
                debug!(parent = %to_hex_be(&parent), height = ?chain.height(), "loaded fork parent from store");
                chains.push(chain);
            }
        }

        let updates = connect_headers_to_chains(&new_headers, chains, &self.params);

        let mut connected: Vec<BlockHeaderDb> = Vec::new();
        let mut connected_hashes = HashSet::new();
        for update in &updates {
            for db in update.successful_headers() {
                if connected_hashes.insert(db.hash) {
                    connected.push(db.clone());
                }
            }
        }
        if connected.is_empty() {
            let reason = updates
                .iter()
                .find_map(|update| match update {
                    BlockchainUpdate::Failed {
                        failed_header,
                        tip_update_failure,
                        ..
                    } => Some(format!(
                        "{}: {}",
                        to_hex_be(&failed_header.hash()),
                        tip_update_failure.reason()
                    )),
                    BlockchainUpdate::Successful { .. } => None,
                })
                .unwrap_or_else(|| "no candidate chain".to_string());
            return Err(ChainError::InvalidBlockHeader(reason));
        }
        connected.sort_by_key(|h| h.height);

        let rejected = new_headers.len() - connected.len();
        if rejected > 0 {
            warn!(rejected, connected = connected.len(), "headers did not connect to any chain");
        }

        self.store.create_all(connected.clone()).await?;

        let chains = self.prune_chains(updates.into_iter().map(BlockchainUpdate::into_blockchain).collect());
        let next = self.commit(chains);
        info!(
            count = connected.len(),
            height = ?connected.last().map(|h| h.height),
            "connected block headers"
        );
        self.callbacks.dispatch(ChainEvent::BlockHeadersConnected(connected));
        Ok(next)
    }

    /// Drop chains another chain extends or that repeat a tip, then trim
    /// each to the cache depth
    fn prune_chains(&self, chains: Vec<Blockchain>) -> Vec<Blockchain> {
        let tips: Vec<Option<Hash>> = chains.iter().map(|c| c.tip().map(|t| t.hash)).collect();
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(chains.len());
        for (i, chain) in chains.iter().enumerate() {
            let Some(tip) = tips[i] else { continue };
            let extended = chains
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && tips[j] != Some(tip) && other.contains(&tip));
            if extended || !seen.insert(tip) {
                continue;
            }
            let mut chain = chain.clone();
            chain.trim(self.config.chain_cache_depth);
            kept.push(chain);
        }
        kept
    }

    fn best_in_memory(&self) -> Option<&BlockHeaderDb> {
        best_tip(self.blockchains.iter().filter_map(Blockchain::tip))
    }

    /// Tip with the most chain work; equal work goes to the oldest timestamp
    pub async fn get_best_block_header(&self) -> Result<BlockHeaderDb> {
        if let Some(tip) = self.best_in_memory() {
            return Ok(tip.clone());
        }
        let tips = self.store.chain_tips().await?;
        best_tip(tips.iter())
            .cloned()
            .ok_or_else(|| ChainError::ChainState("no block headers stored".into()))
    }

    pub async fn get_best_block_hash(&self) -> Result<Hash> {
        Ok(self.get_best_block_header().await?.hash)
    }

    /// Height of the best tip
    pub async fn get_block_count(&self) -> Result<u32> {
        Ok(self.get_best_block_header().await?.height)
    }

    pub async fn get_header(&self, hash: &Hash) -> Result<Option<BlockHeaderDb>> {
        if let Some(header) = self.blockchains.iter().find_map(|c| c.find(hash)) {
            return Ok(Some(header.clone()));
        }
        Ok(self.store.find_by_hash(hash).await?)
    }

    async fn require_header(&self, hash: &Hash) -> Result<BlockHeaderDb> {
        self.get_header(hash)
            .await?
            .ok_or_else(|| ChainError::UnknownBlockHash(to_hex_be(hash)))
    }

    pub async fn get_headers_at_height(&self, height: u32) -> Result<Vec<BlockHeaderDb>> {
        Ok(self.store.get_at_height(height).await?)
    }

    /// Up to `len` headers ending at `stop`, oldest first. Shorter when the
    /// chain starts or breaks off earlier.
    async fn chain_ending_at(&self, stop: &BlockHeaderDb, len: usize) -> Result<Blockchain> {
        if len == 0 {
            return Ok(Blockchain::default());
        }
        let from = stop.height.saturating_sub((len - 1) as u32);
        for chain in &self.blockchains {
            if let Some(mut prefix) = chain.prefix_through(&stop.hash) {
                if prefix.first().is_some_and(|first| first.height <= from) {
                    prefix.trim(len);
                    return Ok(prefix);
                }
            }
        }
        let headers = self.store.get_between_heights(from, stop.height).await?;
        let by_hash: HashMap<Hash, BlockHeaderDb> = headers.into_iter().map(|h| (h.hash, h)).collect();
        Ok(Blockchain::walk_back(stop.clone(), &by_hash, len))
    }

    async fn ancestor_at(&self, tip: &BlockHeaderDb, height: u32) -> Result<Option<BlockHeaderDb>> {
        if height > tip.height {
            return Ok(None);
        }
        let chain = self.chain_ending_at(tip, (tip.height - height) as usize + 1).await?;
        Ok(chain.first().filter(|h| h.height == height).cloned())
    }

    async fn common_ancestor_height(&self, a: &BlockHeaderDb, b: &BlockHeaderDb) -> Result<u32> {
        let height = a.height.min(b.height);
        let mut left = self.ancestor_at(a, height).await?;
        let mut right = self.ancestor_at(b, height).await?;
        while let (Some(l), Some(r)) = (&left, &right) {
            if l.hash == r.hash {
                return Ok(l.height);
            }
            if l.height == 0 {
                break;
            }
            let (lp, rp) = (*l.prev_hash(), *r.prev_hash());
            left = self.get_header(&lp).await?;
            right = self.get_header(&rp).await?;
        }
        Err(ChainError::ChainState(format!(
            "no common ancestor for {} and {}",
            to_hex_be(&a.hash),
            to_hex_be(&b.hash)
        )))
    }

    /// ProcessFilterHeaders: 𝒻ℋ* × Hash → ChainHandler
    ///
    /// The batch belongs to the block headers ending at `stop_hash`, one
    /// filter header per block. Each new filter header must link to its
    /// predecessor in the batch or in the store, exactly one height below.
    pub async fn process_filter_headers(&self, filter_headers: &[FilterHeader], stop_hash: Hash) -> Result<Self> {
        if filter_headers.is_empty() {
            return Ok(self.clone());
        }
        let _guard = self.writer.lock().await;
        let stop = self.require_header(&stop_hash).await?;
        let blocks = self.chain_ending_at(&stop, filter_headers.len()).await?;
        if blocks.len() != filter_headers.len() {
            return Err(ChainError::UnknownBlockHash(format!(
                "{} filter headers but only {} block headers end at {}",
                filter_headers.len(),
                blocks.len(),
                to_hex_be(&stop_hash)
            )));
        }

        let batch: Vec<CompactFilterHeaderDb> = filter_headers
            .iter()
            .zip(blocks.headers())
            .map(|(fh, block)| CompactFilterHeaderDb::new(*fh, block.hash, block.height))
            .collect();
        let block_hashes: Vec<Hash> = batch.iter().map(|fh| fh.block_hash).collect();
        let stored: HashMap<Hash, CompactFilterHeaderDb> = self
            .store
            .find_filter_headers_by_block_hashes(&block_hashes)
            .await?
            .into_iter()
            .map(|fh| (fh.block_hash, fh))
            .collect();

        let mut new_filter_headers = Vec::with_capacity(batch.len());
        for fh in batch {
            match stored.get(&fh.block_hash) {
                Some(existing) if existing.hash == fh.hash => {}
                Some(existing) => {
                    return Err(ChainError::InvalidFilterHeader(format!("{fh} conflicts with stored {existing}")))
                }
                None => new_filter_headers.push(fh),
            }
        }
        if new_filter_headers.is_empty() {
            debug!(stop = %to_hex_be(&stop_hash), "filter headers already stored");
            return Ok(self.clone());
        }

        self.verify_filter_header_links(&new_filter_headers).await?;
        self.verify_checkpoints(&new_filter_headers)?;

        self.store.create_all_filter_headers(new_filter_headers.clone()).await?;
        info!(
            count = new_filter_headers.len(),
            height = ?new_filter_headers.last().map(|fh| fh.height),
            "connected filter headers"
        );
        self.callbacks.dispatch(ChainEvent::FilterHeadersConnected(new_filter_headers));
        Ok(self.clone())
    }

    async fn verify_filter_header_links(&self, batch: &[CompactFilterHeaderDb]) -> Result<()> {
        let mut heights: HashMap<Hash, u32> = HashMap::with_capacity(batch.len());
        for fh in batch {
            if fh.height == 0 {
                if fh.previous_filter_header != ZERO_HASH {
                    return Err(ChainError::InvalidFilterHeader(format!(
                        "{fh} must link to the zero hash"
                    )));
                }
            } else {
                let prev_height = match heights.get(&fh.previous_filter_header) {
                    Some(height) => Some(*height),
                    None => self
                        .store
                        .find_filter_header(&fh.previous_filter_header)
                        .await?
                        .map(|prev| prev.height),
                };
                match prev_height {
                    Some(height) if height + 1 == fh.height => {}
                    Some(height) => {
                        return Err(ChainError::InvalidFilterHeader(format!(
                            "{fh} links to a filter header at height {height}"
                        )))
                    }
                    None => {
                        return Err(ChainError::InvalidFilterHeader(format!(
                            "{fh} links to unknown filter header {}",
                            to_hex_be(&fh.previous_filter_header)
                        )))
                    }
                }
            }
            heights.insert(fh.hash, fh.height);
        }
        Ok(())
    }

    fn verify_checkpoints(&self, batch: &[CompactFilterHeaderDb]) -> Result<()> {
        for fh in batch {
            if let Some(expected) = self.filter_checkpoints.get(&fh.block_hash) {
                if *expected != fh.hash {
                    return Err(ChainError::InvalidFilterHeader(format!(
                        "{fh} does not match checkpoint {}",
                        to_hex_be(expected)
                    )));
                }
            }
        }
        Ok(())
    }

    /// ProcessFilters: 𝒻* → ChainHandler
    ///
    /// Each filter must hash to the filter hash its block's filter header
    /// commits to.
    pub async fn process_filters(&self, messages: &[CompactFilterMessage]) -> Result<Self> {
        if messages.is_empty() {
            return Ok(self.clone());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = messages.iter().find(|m| !seen.insert(m.block_hash)) {
            return Err(ChainError::DuplicateFilters(format!(
                "block {} appears more than once",
                to_hex_be(&dup.block_hash)
            )));
        }

        let _guard = self.writer.lock().await;
        let block_hashes: Vec<Hash> = messages.iter().map(|m| m.block_hash).collect();
        let stored: HashSet<Hash> = self
            .store
            .find_filters_by_block_hashes(&block_hashes)
            .await?
            .into_iter()
            .map(|f| f.block_hash)
            .collect();
        let pending: Vec<&CompactFilterMessage> = messages.iter().filter(|m| !stored.contains(&m.block_hash)).collect();
        if pending.is_empty() {
            debug!(count = messages.len(), "filters already stored");
            return Ok(self.clone());
        }

        let pending_hashes: Vec<Hash> = pending.iter().map(|m| m.block_hash).collect();
        let filter_headers: HashMap<Hash, CompactFilterHeaderDb> = self
            .store
            .find_filter_headers_by_block_hashes(&pending_hashes)
            .await?
            .into_iter()
            .map(|fh| (fh.block_hash, fh))
            .collect();

        let mut filters = Vec::with_capacity(pending.len());
        for message in pending {
            let Some(filter_header) = filter_headers.get(&message.block_hash) else {
                return Err(ChainError::UnknownBlockHash(format!(
                    "no filter header for block {}",
                    to_hex_be(&message.block_hash)
                )));
            };
            let filter = CompactFilterDb::new(
                message.filter_type,
                message.filter_bytes.clone(),
                message.block_hash,
                filter_header.height,
            );
            if filter.hash != filter_header.filter_hash {
                return Err(ChainError::UnknownFilterHash(format!(
                    "filter for block {} hashes to {}, its filter header commits to {}",
                    to_hex_be(&message.block_hash),
                    to_hex_be(&filter.hash),
                    to_hex_be(&filter_header.filter_hash)
                )));
            }
            filters.push(filter);
        }
        filters.sort_by_key(|f| f.height);

        self.store.create_all_filters(filters.clone()).await?;
        info!(
            count = filters.len(),
            height = ?filters.last().map(|f| f.height),
            "connected filters"
        );
        self.callbacks.dispatch(ChainEvent::FiltersConnected(filters));
        Ok(self.clone())
    }

    /// Checkpoint `i` is the filter header of the ancestor of `block_hash`
    /// at height `(i + 1) * 1000`
    pub async fn process_checkpoints(&self, checkpoints: &[Hash], block_hash: Hash) -> Result<Self> {
        let stop = self.require_header(&block_hash).await?;
        let mut filter_checkpoints = self.filter_checkpoints.clone();
        for (i, checkpoint) in checkpoints.iter().enumerate() {
            let height = (i as u32 + 1) * FILTER_CHECKPOINT_INTERVAL;
            let block = self.ancestor_at(&stop, height).await?.ok_or_else(|| {
                ChainError::UnknownBlockHash(format!(
                    "no ancestor of {} at checkpoint height {height}",
                    to_hex_be(&block_hash)
                ))
            })?;
            if let Some(existing) = self.store.find_filter_header_by_block_hash(&block.hash).await? {
                if existing.hash != *checkpoint {
                    return Err(ChainError::InvalidFilterHeader(format!(
                        "{existing} contradicts checkpoint {}",
                        to_hex_be(checkpoint)
                    )));
                }
            }
            filter_checkpoints.insert(block.hash, *checkpoint);
        }
        debug!(count = checkpoints.len(), "registered filter header checkpoints");
        Ok(Self {
            filter_checkpoints,
            ..self.clone()
        })
    }

    async fn batch_marker(
        &self,
        stop: &BlockHeaderDb,
        start_height: u32,
        batch_size: u32,
    ) -> Result<Option<FilterSyncMarker>> {
        if batch_size == 0 {
            return Err(ChainError::InvalidArgument("batch size must be positive".into()));
        }
        if start_height > stop.height {
            return Ok(None);
        }
        let stop_height = start_height.saturating_add(batch_size - 1).min(stop.height);
        let stop_block = self.ancestor_at(stop, stop_height).await?.ok_or_else(|| {
            ChainError::UnknownBlockHash(format!(
                "no header at height {stop_height} below {}",
                to_hex_be(&stop.hash)
            ))
        })?;
        Ok(Some(FilterSyncMarker {
            start_height,
            stop_block_hash: stop_block.hash,
        }))
    }

    /// Next header range after `prev_stop_hash` towards `stop_hash`. When
    /// the previous stop is on another branch the range restarts above the
    /// fork point.
    pub async fn next_block_header_batch_range(
        &self,
        prev_stop_hash: Hash,
        stop_hash: Hash,
        batch_size: u32,
    ) -> Result<Option<FilterSyncMarker>> {
        if prev_stop_hash == stop_hash {
            return Ok(None);
        }
        let stop = self.require_header(&stop_hash).await?;
        let start_height = if prev_stop_hash == ZERO_HASH {
            0
        } else {
            let prev = self.require_header(&prev_stop_hash).await?;
            self.common_ancestor_height(&prev, &stop).await? + 1
        };
        self.batch_marker(&stop, start_height, batch_size).await
    }

    /// Next `getcfheaders` range, starting above the highest stored filter
    /// header unless `start_height` is given
    pub async fn next_filter_header_batch_range(
        &self,
        stop_hash: Hash,
        batch_size: u32,
        start_height: Option<u32>,
    ) -> Result<Option<FilterSyncMarker>> {
        let stop = self.require_header(&stop_hash).await?;
        let start_height = match start_height {
            Some(height) => height,
            None => self.store.max_filter_header_height().await?.map_or(0, |h| h + 1),
        };
        self.batch_marker(&stop, start_height, batch_size).await
    }

    /// Next `getcfilters` range; never passes the highest stored filter
    /// header
    pub async fn next_filter_batch_range(
        &self,
        stop_hash: Hash,
        batch_size: u32,
        start_height: Option<u32>,
    ) -> Result<Option<FilterSyncMarker>> {
        let Some(filter_header_height) = self.store.max_filter_header_height().await? else {
            return Ok(None);
        };
        let stop = self.require_header(&stop_hash).await?;
        let stop = if stop.height > filter_header_height {
            match self.ancestor_at(&stop, filter_header_height).await? {
                Some(ancestor) => ancestor,
                None => return Ok(None),
            }
        } else {
            stop
        };
        let start_height = match start_height {
            Some(height) => height,
            None => self.store.max_filter_height().await?.map_or(0, |h| h + 1),
        };
        self.batch_marker(&stop, start_height, batch_size).await
    }

    /// RecalculateChainWork: from the lowest header with zero chain work up
    /// to the highest stored header, in batches of `chain_work_batch_size`
    /// heights, each persisted before the next is read.
    ///
    /// `cancel` is checked before every batch; batches already written stay.
    pub async fn recalculate_chain_work(&self, cancel: &watch::Receiver<bool>) -> Result<Self> {
        let _guard = self.writer.lock().await;
        let Some(lowest) = self.store.lowest_no_work_height().await? else {
            debug!("every stored header carries chain work");
            return Ok(self.clone());
        };
        let max_height = self.store.max_height().await?.unwrap_or(lowest);
        let batch_size = self.config.chain_work_batch_size;
        info!(from = lowest, to = max_height, batch_size, "recalculating chain work");

        // Hash -> (height, chain work) of the headers the next batch builds on
        let mut parents: HashMap<Hash, (u32, U256)> = if lowest == 0 {
            HashMap::new()
        } else {
            self.store
                .get_at_height(lowest - 1)
                .await?
                .into_iter()
                .map(|h| (h.hash, (h.height, h.chain_work)))
                .collect()
        };

        let mut updated_total = 0usize;
        let mut from = lowest;
        while from <= max_height {
            if *cancel.borrow() {
                warn!(height = from, "chain work recalculation cancelled");
                return Err(ChainError::Cancelled);
            }
            let to = from.saturating_add(batch_size - 1).min(max_height);
            let headers = self.store.get_between_heights(from, to).await?;

            let mut updated = Vec::with_capacity(headers.len());
            for mut header in headers {
                let proof = block_proof(header.bits());
                let work = if header.height == 0 {
                    proof
                } else {
                    match parents.get(header.prev_hash()) {
                        Some((_, parent_work)) => parent_work.saturating_add(proof),
                        None => {
                            warn!(
                                hash = %to_hex_be(&header.hash),
                                height = header.height,
                                "parent not stored, chain work left unchanged"
                            );
                            continue;
                        }
                    }
                };
                header.chain_work = work;
                parents.insert(header.hash, (header.height, work));
                updated.push(header);
            }
            parents.retain(|_, (height, _)| *height == to);

            updated_total += updated.len();
            self.store.upsert_all(updated).await?;
            debug!(from, to, "chain work batch persisted");

            if to == u32::MAX {
                break;
            }
            from = to + 1;
        }

        let chains = self.store.get_blockchains(self.config.chain_cache_depth).await?;
        info!(headers = updated_total, "chain work recalculated");
        Ok(self.commit(chains))
    }

    /// Median of the timestamps of up to eleven headers ending at the best
    /// tip: element `len / 2` of the sorted timestamps
    pub async fn get_median_time_past(&self) -> Result<u32> {
        let tip = self.get_best_block_header().await?;
        let chain = self.chain_ending_at(&tip, MEDIAN_TIME_SPAN).await?;
        chain
            .median_time_past()
            .ok_or_else(|| ChainError::ChainState("no headers for median time past".into()))
    }

    /// Confirmations of `block_hash`: the most over all candidate tips whose
    /// chain contains it, `None` when no candidate does
    pub async fn get_number_of_confirmations(&self, block_hash: &Hash) -> Result<Option<u32>> {
        let Some(header) = self.get_header(block_hash).await? else {
            return Ok(None);
        };
        let mut confirmations = None;
        for tip in self.blockchains.iter().filter_map(Blockchain::tip) {
            if tip.height < header.height {
                continue;
            }
            let on_chain = self
                .ancestor_at(tip, header.height)
                .await?
                .is_some_and(|ancestor| ancestor.hash == *block_hash);
            if on_chain {
                confirmations = confirmations.max(Some(tip.height - header.height + 1));
            }
        }
        Ok(confirmations)
    }

    pub async fn get_filter_header(&self, block_hash: &Hash) -> Result<Option<CompactFilterHeaderDb>> {
        Ok(self.store.find_filter_header_by_block_hash(block_hash).await?)
    }

    /// Highest filter header, preferring the one on the best chain
    pub async fn get_best_filter_header(&self) -> Result<Option<CompactFilterHeaderDb>> {
        let Some(height) = self.store.max_filter_header_height().await? else {
            return Ok(None);
        };
        let candidates = self.store.filter_headers_at_height(height).await?;
        if candidates.len() > 1 {
            let best = self.get_best_block_header().await?;
            if let Some(block) = self.ancestor_at(&best, height).await? {
                if let Some(on_best) = candidates.iter().find(|fh| fh.block_hash == block.hash) {
                    return Ok(Some(on_best.clone()));
                }
            }
        }
        Ok(candidates.into_iter().next())
    }

    /// Height of the highest filter header, 0 when none is stored
    pub async fn get_filter_header_count(&self) -> Result<u32> {
        Ok(self.store.max_filter_header_height().await?.unwrap_or(0))
    }

    pub async fn get_filter(&self, block_hash: &Hash) -> Result<Option<CompactFilterDb>> {
        Ok(self.store.find_filter_by_block_hash(block_hash).await?)
    }

    /// Height of the highest filter, 0 when none is stored
    pub async fn get_filter_count(&self) -> Result<u32> {
        Ok(self.store.max_filter_height().await?.unwrap_or(0))
    }

    pub async fn get_filters_between_heights(&self, from: u32, to: u32) -> Result<Vec<FilterResponse>> {
        if from > to {
            return Err(ChainError::InvalidArgument(format!("start height {from} above end height {to}")));
        }
        let filters = self.store.filters_between_heights(from, to).await?;
        Ok(filters.into_iter().map(FilterResponse::from).collect())
    }

    /// Resolve a stamp to a height; times resolve on the best chain
    pub async fn get_height_by_block_stamp(&self, stamp: BlockStamp) -> Result<u32> {
        match stamp {
            BlockStamp::Height(height) => Ok(height),
            BlockStamp::Hash(hash) => Ok(self.require_header(&hash).await?.height),
            BlockStamp::Time(time) => {
                let tip = self.get_best_block_header().await?;
                self.store
                    .find_closest_before_time(&tip, time)
                    .await?
                    .map(|h| h.height)
                    .ok_or_else(|| ChainError::InvalidArgument(format!("no header at or before time {time}")))
            }
        }
    }

    pub async fn is_syncing(&self) -> Result<bool> {
        Ok(self.store.is_syncing().await?)
    }

    /// Store the syncing flag; callbacks fire only when it changes
    pub async fn set_syncing(&self, value: bool) -> Result<Self> {
        let previous = self.store.set_syncing(value).await?;
        if previous != value {
            info!(syncing = value, "sync flag changed");
            self.callbacks.dispatch(ChainEvent::SyncFlagChanged(value));
        }
        Ok(self.clone())
    }

    pub async fn is_ibd(&self) -> Result<bool> {
        Ok(self.store.is_ibd().await?)
    }

    pub async fn set_ibd(&self, value: bool) -> Result<Self> {
        let previous = self.store.set_ibd(value).await?;
        if previous && !value {
            info!("initial block download complete");
        }
        Ok(self.clone())
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        if self.store.header_count().await? <= 1 {
            return Ok(SyncStatus::NoHeaders);
        }
        let tips: Vec<&BlockHeaderDb> = self.blockchains.iter().filter_map(Blockchain::tip).collect();
        if let Some(max_work) = tips.iter().map(|t| t.chain_work).max() {
            let tied: HashSet<Hash> = tips
                .iter()
                .filter(|t| t.chain_work == max_work)
                .map(|t| t.hash)
                .collect();
            if tied.len() > 1 {
                return Ok(SyncStatus::ReorgDetected);
            }
        }
        if self.store.is_syncing().await? {
            Ok(SyncStatus::Syncing)
        } else {
            Ok(SyncStatus::Synced)
        }
    }

    /// Pull headers from `source` back to the first one already known and
    /// connect them oldest first, raising the syncing flag meanwhile
    pub async fn sync_headers_from<H>(&self, source: &H) -> Result<Self>
    where
        H: HeaderSource + ?Sized,
    {
        let best_hash = source.get_best_block_hash().await?;
        if self.get_header(&best_hash).await?.is_some() {
            debug!(hash = %to_hex_be(&best_hash), "source tip already known");
            return Ok(self.clone());
        }

        let mut missing = Vec::new();
        let mut cursor = best_hash;
        loop {
            let header = source
                .get_block_header(&cursor)
                .await?
                .ok_or_else(|| ChainError::UnknownBlockHash(format!("source has no header {}", to_hex_be(&cursor))))?;
            let parent = header.prev_block_hash;
            missing.push(header);
            if self.get_header(&parent).await?.is_some() {
                break;
            }
            if parent == ZERO_HASH {
                return Err(ChainError::ChainState(
                    "source chain does not connect to any stored header".into(),
                ));
            }
            cursor = parent;
        }
        missing.reverse();
        info!(count = missing.len(), tip = %to_hex_be(&best_hash), "syncing headers from source");

        let mut handler = self.set_syncing(true).await?;
        for chunk in missing.chunks(MAX_HEADERS_PER_MESSAGE) {
            handler = match handler.process_headers(chunk).await {
                Ok(next) => next,
                Err(e) => {
                    handler.set_syncing(false).await?;
                    return Err(e);
                }
            };
        }
        handler.set_syncing(false).await
    }
}
