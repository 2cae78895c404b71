//! Taproot helpers: annexes, control blocks, tagged tree hashes and the
//! output-key tweak of BIP341

use crate::constants::*;
use crate::crypto::{sha256, tagged_hash};
use crate::error::{ChainError, Result};
use crate::serialization::write_var_bytes;
use crate::types::{ByteString, Hash};
use secp256k1::{Parity, Scalar, Secp256k1, XOnlyPublicKey};

/// Taproot output script: OP_1 <32-byte key>
pub fn taproot_output_key(script: &[u8]) -> Option<[u8; 32]> {
    if script.len() != 34 || script[0] != OP_1 || script[1] != 0x20 {
        return None;
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&script[2..]);
    Some(key)
}

/// Annex: a witness element starting with 0x50
pub fn is_annex(element: &[u8]) -> bool {
    element.first() == Some(&ANNEX_TAG)
}

/// Annex of a stack: the last element when it is an annex and the stack has
/// at least two elements
pub fn annex_of(stack: &[ByteString]) -> Option<&ByteString> {
    match stack {
        [_, .., last] if is_annex(last) => Some(last),
        _ => None,
    }
}

/// sha256(compact_size(|annex|) ‖ annex)
pub fn annex_hash(annex: &[u8]) -> Hash {
    let mut data = Vec::with_capacity(annex.len() + 9);
    write_var_bytes(&mut data, annex);
    sha256(&data)
}

/// Parsed script-path control block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBlock {
    pub leaf_version: u8,
    /// Parity bit of the output key
    pub output_key_parity: u8,
    pub internal_key: [u8; 32],
    pub merkle_branch: Vec<Hash>,
}

impl ControlBlock {
    /// Parse and validate: size 33 + 32k with k ≤ 128 and a valid x-only key
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let len = bytes.len();
        let max = TAPROOT_CONTROL_BASE_SIZE + TAPROOT_CONTROL_NODE_SIZE * TAPROOT_CONTROL_MAX_NODE_COUNT;
        if len < TAPROOT_CONTROL_BASE_SIZE
            || len > max
            || (len - TAPROOT_CONTROL_BASE_SIZE) % TAPROOT_CONTROL_NODE_SIZE != 0
        {
            return Err(ChainError::InvalidScript(format!(
                "invalid control block size {len}"
            )));
        }
        XOnlyPublicKey::from_slice(&bytes[1..TAPROOT_CONTROL_BASE_SIZE])
            .map_err(|e| ChainError::InvalidScript(format!("invalid internal key: {e}")))?;

        let mut internal_key = [0u8; 32];
        internal_key.copy_from_slice(&bytes[1..TAPROOT_CONTROL_BASE_SIZE]);
        let merkle_branch = bytes[TAPROOT_CONTROL_BASE_SIZE..]
            .chunks_exact(TAPROOT_CONTROL_NODE_SIZE)
            .map(|chunk| {
                let mut node = [0u8; 32];
                node.copy_from_slice(chunk);
                node
            })
            .collect();
        Ok(Self {
            leaf_version: bytes[0] & TAPROOT_LEAF_MASK,
            output_key_parity: bytes[0] & 0x01,
            internal_key,
            merkle_branch,
        })
    }

    pub fn serialize(&self) -> ByteString {
        let mut out = Vec::with_capacity(
            TAPROOT_CONTROL_BASE_SIZE + TAPROOT_CONTROL_NODE_SIZE * self.merkle_branch.len(),
        );
        out.push(self.leaf_version | self.output_key_parity);
        out.extend_from_slice(&self.internal_key);
        for node in &self.merkle_branch {
            out.extend_from_slice(node);
        }
        out
    }
}

/// TapLeaf hash: tagged("TapLeaf", leaf_version ‖ compact_size(|script|) ‖ script)
pub fn tap_leaf_hash(leaf_version: u8, script: &[u8]) -> Hash {
    let mut data = Vec::with_capacity(script.len() + 10);
    data.push(leaf_version);
    write_var_bytes(&mut data, script);
    tagged_hash("TapLeaf", &data)
}

/// TapBranch hash of two children, in lexicographic order
pub fn tap_branch_hash(a: &Hash, b: &Hash) -> Hash {
    let (left, right) = if a <= b { (a, b) } else { (b, a) };
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    tagged_hash("TapBranch", &data)
}

/// TapTweak hash: tagged("TapTweak", internal_key ‖ merkle_root?)
pub fn tap_tweak_hash(internal_key: &[u8; 32], merkle_root: Option<&Hash>) -> Hash {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(internal_key);
    if let Some(root) = merkle_root {
        data.extend_from_slice(root);
    }
    tagged_hash("TapTweak", &data)
}

/// Fold a leaf hash up a merkle branch
pub fn compute_merkle_root(leaf_hash: &Hash, branch: &[Hash]) -> Hash {
    branch
        .iter()
        .fold(*leaf_hash, |acc, node| tap_branch_hash(&acc, node))
}

/// Output key Q = P + t·G with t = TapTweak(P ‖ root), returned with its parity
pub fn tweak_internal_key(internal_key: &[u8; 32], merkle_root: Option<&Hash>) -> Result<([u8; 32], u8)> {
    let secp = Secp256k1::verification_only();
    let internal = XOnlyPublicKey::from_slice(internal_key)
        .map_err(|e| ChainError::InvalidScript(format!("invalid internal key: {e}")))?;
    let tweak = Scalar::from_be_bytes(tap_tweak_hash(internal_key, merkle_root))
        .map_err(|_| ChainError::InvalidScript("tweak exceeds curve order".to_string()))?;
    let (output, parity) = internal
        .add_tweak(&secp, &tweak)
        .map_err(|e| ChainError::InvalidScript(format!("tweak failed: {e}")))?;
    Ok((output.serialize(), parity.to_u8()))
}

/// Check that `script` under `control_block` commits to `output_key`
pub fn verify_script_path_commitment(
    output_key: &[u8; 32],
    script: &[u8],
    control_block: &ControlBlock,
) -> Result<bool> {
    let leaf = tap_leaf_hash(control_block.leaf_version, script);
    let root = compute_merkle_root(&leaf, &control_block.merkle_branch);
    let (expected, parity) = tweak_internal_key(&control_block.internal_key, Some(&root))?;
    Ok(expected == *output_key && parity == control_block.output_key_parity)
}

/// Same check through secp256k1's own tweak verification
pub fn tweak_add_check(
    internal_key: &[u8; 32],
    output_key: &[u8; 32],
    parity: u8,
    merkle_root: Option<&Hash>,
) -> Result<bool> {
    let secp = Secp256k1::verification_only();
    let internal = XOnlyPublicKey::from_slice(internal_key)
        .map_err(|e| ChainError::InvalidScript(format!("invalid internal key: {e}")))?;
    let output = XOnlyPublicKey::from_slice(output_key)
        .map_err(|e| ChainError::InvalidScript(format!("invalid output key: {e}")))?;
    let parity = Parity::from_u8(parity)
        .map_err(|e| ChainError::InvalidScript(format!("invalid parity: {e}")))?;
    let tweak = Scalar::from_be_bytes(tap_tweak_hash(internal_key, merkle_root))
        .map_err(|_| ChainError::InvalidScript("tweak exceeds curve order".to_string()))?;
    Ok(internal.tweak_add_check(&secp, &output, parity, tweak))
}
