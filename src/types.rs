//! Core Bitcoin value types: outpoints, transactions, witnesses and block headers

use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash, internal byte order
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// OutPoint: reference to output `index` of transaction `hash`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    /// The outpoint spent by coinbase inputs
    pub const NULL: OutPoint = OutPoint {
        hash: [0u8; 32],
        index: u32::MAX,
    };

    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
}

/// Transaction output. `value` is signed so the legacy SIGHASH_SINGLE
/// serializer can express its -1 "null" outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: i64,
    pub script_pubkey: ByteString,
}

impl TransactionOutput {
    /// Output blanked by the legacy SIGHASH_SINGLE transform
    pub fn null() -> Self {
        Self {
            value: -1,
            script_pubkey: Vec::new(),
        }
    }
}

/// Witness stack attached to one input, bottom element first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub stack: Vec<ByteString>,
}

impl Witness {
    pub fn new(stack: Vec<ByteString>) -> Self {
        Self { stack }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Top stack element (last serialized)
    pub fn last(&self) -> Option<&ByteString> {
        self.stack.last()
    }
}

/// Transaction. `witnesses` is either empty or holds one stack per input;
/// the segwit encoding is used iff at least one stack is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
    #[serde(default)]
    pub witnesses: Vec<Witness>,
}

impl Transaction {
    /// True if any input carries a non-empty witness stack
    pub fn has_witness(&self) -> bool {
        self.witnesses.iter().any(|w| !w.is_empty())
    }

    /// Witness of input `index`, empty when the transaction carries none
    pub fn witness(&self, index: usize) -> Option<&Witness> {
        self.witnesses.get(index)
    }
}

/// Block header: 80-byte fixed layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}
