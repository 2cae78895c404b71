//! Header chains with cumulative work
//!
//! A [`Blockchain`] is a contiguous run of headers ordered oldest to tip.
//! Several chains compete as tip candidates; [`connect_headers_to_chains`]
//! folds a batch of new headers over all of them, extending chains, forking
//! new ones where a header connects below a tip, and marking chains failed
//! when a header does not validate against them.

use crate::error::{ChainError, Result};
use crate::network::ChainParams;
use crate::pow::{block_proof, check_proof_of_work, get_next_work_required};
use crate::constants::MEDIAN_TIME_SPAN;
use crate::types::{BlockHeader, Hash};
use crate::crypto::to_hex_be;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Header as persisted: with its height, hash and cumulative chain work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaderDb {
    pub height: u32,
    pub hash: Hash,
    pub header: BlockHeader,
    pub chain_work: U256,
}

impl BlockHeaderDb {
    pub fn new(header: BlockHeader, height: u32, chain_work: U256) -> Self {
        Self {
            height,
            hash: header.hash(),
            header,
            chain_work,
        }
    }

    /// Genesis entry, carrying its own proof as chain work
    pub fn genesis(params: &ChainParams) -> Self {
        let header = params.genesis_header.clone();
        let work = block_proof(header.bits);
        Self::new(header, 0, work)
    }

    pub fn prev_hash(&self) -> &Hash {
        &self.header.prev_block_hash
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn bits(&self) -> u32 {
        self.header.bits
    }

    /// Entry for the header following this one
    pub fn child(&self, header: BlockHeader) -> Self {
        let work = self.chain_work.saturating_add(block_proof(header.bits));
        Self::new(header, self.height + 1, work)
    }
}

/// Contiguous headers, oldest first, each linking to its predecessor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blockchain {
    headers: Vec<BlockHeaderDb>,
}

impl Blockchain {
    /// Build a chain, checking heights and hash links
    pub fn new(headers: Vec<BlockHeaderDb>) -> Result<Self> {
        for pair in headers.windows(2) {
            let (parent, child) = (&pair[0], &pair[1]);
            if child.height != parent.height + 1 || *child.prev_hash() != parent.hash {
                return Err(ChainError::ChainState(format!(
                    "header {} at height {} does not link to {}",
                    to_hex_be(&child.hash),
                    child.height,
                    to_hex_be(&parent.hash)
                )));
            }
        }
        Ok(Self { headers })
    }

    pub fn single(header: BlockHeaderDb) -> Self {
        Self {
            headers: vec![header],
        }
    }

    /// Chain ending at `tip`, following prev hashes through `by_hash` for at
    /// most `max_len` headers
    pub fn walk_back(tip: BlockHeaderDb, by_hash: &HashMap<Hash, BlockHeaderDb>, max_len: usize) -> Self {
        let mut headers = vec![tip];
        while headers.len() < max_len {
            let Some(oldest) = headers.last() else { break };
            if oldest.height == 0 {
                break;
            }
            match by_hash.get(oldest.prev_hash()) {
                Some(parent) if parent.height + 1 == oldest.height => headers.push(parent.clone()),
                _ => break,
            }
        }
        headers.reverse();
        Self { headers }
    }

    pub fn headers(&self) -> &[BlockHeaderDb] {
        &self.headers
    }

    pub fn into_headers(self) -> Vec<BlockHeaderDb> {
        self.headers
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn tip(&self) -> Option<&BlockHeaderDb> {
        self.headers.last()
    }

    pub fn height(&self) -> Option<u32> {
        self.tip().map(|t| t.height)
    }

    /// Oldest header held in memory
    pub fn first(&self) -> Option<&BlockHeaderDb> {
        self.headers.first()
    }

    pub fn find_at_height(&self, height: u32) -> Option<&BlockHeaderDb> {
        let first = self.first()?.height;
        let index = height.checked_sub(first)? as usize;
        self.headers.get(index)
    }

    fn position(&self, hash: &Hash) -> Option<usize> {
        self.headers.iter().rposition(|h| h.hash == *hash)
    }

    pub fn find(&self, hash: &Hash) -> Option<&BlockHeaderDb> {
        self.position(hash).map(|i| &self.headers[i])
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.position(hash).is_some()
    }

    pub fn push(&mut self, header: BlockHeaderDb) {
        self.headers.push(header);
    }

    /// Keep only the newest `depth` headers
    pub fn trim(&mut self, depth: usize) {
        if self.headers.len() > depth {
            let excess = self.headers.len() - depth;
            self.headers.drain(..excess);
        }
    }

    /// Chain truncated after `hash`
    pub fn prefix_through(&self, hash: &Hash) -> Option<Blockchain> {
        self.position(hash).map(|i| Blockchain {
            headers: self.headers[..=i].to_vec(),
        })
    }

    /// Median of the timestamps of the last eleven headers (fewer near the
    /// start of the chain)
    pub fn median_time_past(&self) -> Option<u32> {
        if self.headers.is_empty() {
            return None;
        }
        let start = self.headers.len().saturating_sub(MEDIAN_TIME_SPAN);
        let mut times: Vec<u32> = self.headers[start..].iter().map(|h| h.timestamp()).collect();
        times.sort_unstable();
        Some(times[times.len() / 2])
    }
}

/// Outcome of validating a header as the next tip of a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TipUpdateResult {
    Success(BlockHeaderDb),
    /// Header does not build on the chain tip
    BadPreviousBlockHash(BlockHeader),
    /// Bits differ from the retarget schedule or encode an unusable target
    BadPow(BlockHeader),
    /// Header hash is above its target
    BadNonce(BlockHeader),
}

impl TipUpdateResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TipUpdateResult::Success(_))
    }

    pub fn reason(&self) -> &'static str {
        match self {
            TipUpdateResult::Success(_) => "connected",
            TipUpdateResult::BadPreviousBlockHash(_) => "bad previous block hash",
            TipUpdateResult::BadPow(_) => "bad proof of work",
            TipUpdateResult::BadNonce(_) => "bad nonce",
        }
    }
}

/// CheckNewTip: ℋ × 𝒞 → 𝒯𝒰
///
/// 1. h.prev must be the chain tip
/// 2. h.bits must equal the required work when it can be derived
/// 3. hash(h) must not exceed the target of h.bits
pub fn check_new_tip(header: &BlockHeader, chain: &Blockchain, params: &ChainParams) -> TipUpdateResult {
    let Some(tip) = chain.tip() else {
        return TipUpdateResult::BadPreviousBlockHash(header.clone());
    };
    if header.prev_block_hash != tip.hash {
        return TipUpdateResult::BadPreviousBlockHash(header.clone());
    }

    let expected = get_next_work_required(&tip.header, tip.height, header, params, |h| {
        chain.find_at_height(h).map(|db| &db.header)
    });
    match expected {
        Some(bits) if bits != header.bits => {
            debug!(
                expected = format_args!("{bits:#010x}"),
                found = format_args!("{:#010x}", header.bits),
                height = tip.height + 1,
                "header bits do not follow the retarget schedule"
            );
            return TipUpdateResult::BadPow(header.clone());
        }
        Some(_) => {}
        None => debug!(
            height = tip.height + 1,
            "retarget window not in memory, checking proof of work only"
        ),
    }

    match check_proof_of_work(header, params) {
        Ok(true) => TipUpdateResult::Success(tip.child(header.clone())),
        Ok(false) => TipUpdateResult::BadNonce(header.clone()),
        Err(_) => TipUpdateResult::BadPow(header.clone()),
    }
}

/// Result of connecting one header to one chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTipResult {
    /// Header builds on the tip
    ExtendChain(BlockHeaderDb),
    /// Header builds below the tip; `fork` is the new competing chain
    Reorg { header: BlockHeaderDb, fork: Blockchain },
    BadTip(TipUpdateResult),
}

impl ConnectTipResult {
    pub fn header(&self) -> Option<&BlockHeaderDb> {
        match self {
            ConnectTipResult::ExtendChain(header) | ConnectTipResult::Reorg { header, .. } => Some(header),
            ConnectTipResult::BadTip(_) => None,
        }
    }
}

/// ConnectTip: ℋ × 𝒞 → 𝒞𝒯
///
/// Extends `chain` when the header builds on its tip, forks a new chain when
/// it builds on an earlier header, and fails otherwise.
pub fn connect_tip(header: &BlockHeader, chain: &Blockchain, params: &ChainParams) -> ConnectTipResult {
    let builds_on_tip = chain.tip().is_some_and(|tip| tip.hash == header.prev_block_hash);
    if builds_on_tip {
        return match check_new_tip(header, chain, params) {
            TipUpdateResult::Success(db) => ConnectTipResult::ExtendChain(db),
            failure => ConnectTipResult::BadTip(failure),
        };
    }

    let Some(mut fork) = chain.prefix_through(&header.prev_block_hash) else {
        return ConnectTipResult::BadTip(TipUpdateResult::BadPreviousBlockHash(header.clone()));
    };
    match check_new_tip(header, &fork, params) {
        TipUpdateResult::Success(db) => {
            debug!(
                hash = %to_hex_be(&db.hash),
                height = db.height,
                "header forks below the chain tip"
            );
            fork.push(db.clone());
            ConnectTipResult::Reorg { header: db, fork }
        }
        failure => ConnectTipResult::BadTip(failure),
    }
}

/// State of one candidate chain while a header batch is folded over it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainUpdate {
    Successful {
        blockchain: Blockchain,
        /// Connected headers, oldest first
        successful_headers: Vec<BlockHeaderDb>,
    },
    Failed {
        blockchain: Blockchain,
        successful_headers: Vec<BlockHeaderDb>,
        failed_header: BlockHeader,
        tip_update_failure: TipUpdateResult,
    },
}

impl BlockchainUpdate {
    pub fn blockchain(&self) -> &Blockchain {
        match self {
            BlockchainUpdate::Successful { blockchain, .. } | BlockchainUpdate::Failed { blockchain, .. } => {
                blockchain
            }
        }
    }

    pub fn into_blockchain(self) -> Blockchain {
        match self {
            BlockchainUpdate::Successful { blockchain, .. } | BlockchainUpdate::Failed { blockchain, .. } => {
                blockchain
            }
        }
    }

    pub fn successful_headers(&self) -> &[BlockHeaderDb] {
        match self {
            BlockchainUpdate::Successful { successful_headers, .. }
            | BlockchainUpdate::Failed { successful_headers, .. } => successful_headers,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BlockchainUpdate::Failed { .. })
    }
}

/// ConnectHeadersToChains: ℋ* × 𝒞* → 𝒰*
///
/// For each header in order, every update still successful tries to connect
/// it: an extension replaces the update, a fork adds a new update and keeps
/// the old one, a failure freezes the update with the failing header.
/// Failed updates are carried through unchanged.
pub fn connect_headers_to_chains(
    headers: &[BlockHeader],
    blockchains: Vec<Blockchain>,
    params: &ChainParams,
) -> Vec<BlockchainUpdate> {
    let initial: Vec<BlockchainUpdate> = blockchains
        .into_iter()
        .map(|blockchain| BlockchainUpdate::Successful {
            blockchain,
            successful_headers: Vec::new(),
        })
        .collect();

    headers.iter().fold(initial, |updates, header| {
        updates
            .into_iter()
            .flat_map(|update| connect_update(update, header, params))
            .collect()
    })
}

fn connect_update(update: BlockchainUpdate, header: &BlockHeader, params: &ChainParams) -> Vec<BlockchainUpdate> {
    let BlockchainUpdate::Successful {
        mut blockchain,
        mut successful_headers,
    } = update
    else {
        return vec![update];
    };

    match connect_tip(header, &blockchain, params) {
        ConnectTipResult::ExtendChain(db) => {
            blockchain.push(db.clone());
            successful_headers.push(db);
            vec![BlockchainUpdate::Successful {
                blockchain,
                successful_headers,
            }]
        }
        ConnectTipResult::Reorg { header: db, fork } => vec![
            BlockchainUpdate::Successful {
                blockchain: fork,
                successful_headers: vec![db],
            },
            BlockchainUpdate::Successful {
                blockchain,
                successful_headers,
            },
        ],
        ConnectTipResult::BadTip(failure) => vec![BlockchainUpdate::Failed {
            blockchain,
            successful_headers,
            failed_header: header.clone(),
            tip_update_failure: failure,
        }],
    }
}

/// Best tip across candidate chains: most chain work, ties broken by the
/// oldest timestamp
pub fn best_tip<'a, I>(tips: I) -> Option<&'a BlockHeaderDb>
where
    I: IntoIterator<Item = &'a BlockHeaderDb>,
{
    let tied = most_work_tips(tips);
    if tied.len() > 1 {
        warn!(
            candidates = tied.len(),
            chain_work = %tied[0].chain_work,
            "multiple chain tips with equal work, selecting the oldest"
        );
    }
    tied.into_iter().min_by_key(|t| t.timestamp())
}

/// Distinct tips carrying the maximal chain work, in input order
fn most_work_tips<'a, I>(tips: I) -> Vec<&'a BlockHeaderDb>
where
    I: IntoIterator<Item = &'a BlockHeaderDb>,
{
    let tips: Vec<&BlockHeaderDb> = tips.into_iter().collect();
    let Some(max_work) = tips.iter().map(|t| t.chain_work).max() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    tips.into_iter()
        .filter(|t| t.chain_work == max_work && seen.insert(t.hash))
        .collect()
}
