//! # Chain-Proof
//!
//! Bitcoin signature hashing and header/filter chain verification.
//!
//! Two cores share one set of primitives:
//!
//! - **Signature hashing** ([`sighash`]): bit-exact preimages and digests for
//!   legacy, BIP143 segwit v0 and BIP341 taproot spends, including the
//!   historical `SIGHASH_SINGLE` error hash.
//! - **Chain handling** ([`chain_handler`]): competing header chains ranked
//!   by cumulative work, BIP157 filter-header continuity, BIP158 filter
//!   verification, batched chain-work recalculation and sync bookkeeping
//!   over a pluggable [`store`].
//!
//! ## Design Principles
//!
//! 1. **Exact consensus serialization**: every preimage matches Bitcoin Core
//!    byte for byte
//! 2. **Pure hashing**: signature hashing has no shared state and is safe
//!    to call from any thread
//! 3. **Immutable snapshots**: chain handler operations return new handlers
//!    instead of mutating shared state
//! 4. **Exact Version Pinning**: consensus-critical dependencies pinned to
//!    exact versions
//!
//! ## Usage
//!
//! ```rust
//! use chain_proof::{ChainProof, Network};
//! use chain_proof::crypto::to_hex_be;
//!
//! let proof = ChainProof::new(Network::Mainnet);
//! assert_eq!(
//!     to_hex_be(&proof.genesis_hash()),
//!     "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
//! );
//! ```

pub mod types;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod serialization;
pub mod script;
pub mod transaction;
pub mod witness;
pub mod taproot;
pub mod sighash;
pub mod pow;
pub mod network;
pub mod blockchain;
pub mod filters;
pub mod store;
pub mod callbacks;
pub mod chain_handler;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use types::*;
pub use error::{ChainError, Result};
pub use network::{ChainParams, Network};
pub use blockchain::{BlockHeaderDb, Blockchain};
pub use chain_handler::{ChainHandler, SyncStatus};
pub use config::ChainConfig;
pub use sighash::{HashType, SigVersion, TaprootSigHashOptions, ERROR_HASH};

use callbacks::CallbackRegistry;
use std::sync::Arc;
use store::ChainStore;
use tokio::runtime::Handle;

/// Entry point bundling the network parameters
///
/// # Examples
///
/// ```
/// use chain_proof::{ChainProof, HashType, Network, SigVersion, ERROR_HASH};
/// use chain_proof::types::*;
///
/// let proof = ChainProof::new(Network::Mainnet);
///
/// let tx = Transaction {
///     version: 1,
///     inputs: vec![
///         TransactionInput {
///             prevout: OutPoint::new([1; 32], 0),
///             script_sig: vec![],
///             sequence: 0xffffffff,
///         },
///         TransactionInput {
///             prevout: OutPoint::new([2; 32], 0),
///             script_sig: vec![],
///             sequence: 0xffffffff,
///         },
///     ],
///     outputs: vec![TransactionOutput {
///         value: 1000,
///         script_pubkey: vec![0x51], // OP_1
///     }],
///     lock_time: 0,
///     witnesses: vec![],
/// };
/// let funding = vec![TransactionOutput {
///     value: 2000,
///     script_pubkey: vec![0x51],
/// }];
///
/// // SIGHASH_SINGLE on input 1 has no matching output
/// let digest = proof
///     .hash_for_signature(&tx, 1, &funding, HashType::SINGLE, SigVersion::Base)
///     .unwrap();
/// assert_eq!(digest, ERROR_HASH);
/// ```
#[derive(Debug, Clone)]
pub struct ChainProof {
    params: ChainParams,
}

impl ChainProof {
    pub fn new(network: Network) -> Self {
        Self {
            params: network.chain_params(),
        }
    }

    pub fn network(&self) -> Network {
        self.params.network
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn genesis_hash(&self) -> Hash {
        self.params.genesis_hash()
    }

    /// Parse a transaction in network serialization
    ///
    /// # Examples
    ///
    /// ```
    /// use chain_proof::{ChainProof, Network};
    ///
    /// let proof = ChainProof::new(Network::Regtest);
    /// let raw = hex::decode(
    ///     "01000000010000000000000000000000000000000000000000000000000000000000000000\
    ///      ffffffff00ffffffff01e803000000000000015100000000",
    /// )
    /// .unwrap();
    /// let tx = proof.parse_transaction(&raw).unwrap();
    /// assert!(tx.is_coinbase());
    /// assert_eq!(tx.outputs[0].value, 1000);
    /// ```
    pub fn parse_transaction(&self, bytes: &[u8]) -> Result<Transaction> {
        Transaction::parse(bytes)
    }

    /// Digest to sign for input `input_index`. Script-path taproot spends
    /// take the leaf hash from the input's witness.
    pub fn hash_for_signature(
        &self,
        tx: &Transaction,
        input_index: usize,
        funding_outputs: &[TransactionOutput],
        hash_type: HashType,
        sig_version: SigVersion,
    ) -> Result<Hash> {
        let options = match tx.witness(input_index) {
            Some(witness) if sig_version.is_taproot() => TaprootSigHashOptions::from_witness(witness),
            _ => TaprootSigHashOptions::default(),
        };
        sighash::hash_for_signature(tx, input_index, funding_outputs, hash_type, sig_version, &options)
    }

    /// Check a header's proof of work against this network's limit
    ///
    /// # Examples
    ///
    /// ```
    /// use chain_proof::{ChainProof, Network};
    ///
    /// let proof = ChainProof::new(Network::Mainnet);
    /// let genesis = proof.params().genesis_header.clone();
    /// assert!(proof.check_proof_of_work(&genesis).unwrap());
    /// ```
    pub fn check_proof_of_work(&self, header: &BlockHeader) -> Result<bool> {
        pow::check_proof_of_work(header, &self.params)
    }

    /// Open a chain handler for this network over `store`, spawning
    /// callbacks on the current tokio runtime
    pub async fn chain_handler<S: ChainStore>(
        &self,
        store: Arc<S>,
        callbacks: CallbackRegistry,
    ) -> Result<ChainHandler<S>> {
        let executor = Handle::try_current().map_err(|e| ChainError::ChainState(e.to_string()))?;
        ChainHandler::from_store(store, ChainConfig::for_network(self.network()), callbacks, executor).await
    }
}
