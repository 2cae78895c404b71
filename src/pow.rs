//! Proof of work: header hashing, compact targets, block proof and the
//! retarget schedule

use crate::constants::*;
use crate::crypto::double_sha256;
use crate::error::{ChainError, Result};
use crate::network::ChainParams;
use crate::serialization::ByteReader;
use crate::types::*;
use primitive_types::U256;

impl BlockHeader {
    /// 80-byte header encoding
    pub fn serialize(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut out = [0u8; BLOCK_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_block_hash);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let header = Self {
            version: reader.read_i32_le()?,
            prev_block_hash: reader.read_hash()?,
            merkle_root: reader.read_hash()?,
            timestamp: reader.read_u32_le()?,
            bits: reader.read_u32_le()?,
            nonce: reader.read_u32_le()?,
        };
        reader.finish()?;
        Ok(header)
    }

    /// Block hash: double-SHA256 of the 80-byte encoding, internal order
    pub fn hash(&self) -> Hash {
        double_sha256(&self.serialize())
    }
}

/// Decoded compact target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactTarget {
    pub target: U256,
    pub negative: bool,
    pub overflow: bool,
}

impl CompactTarget {
    /// Usable as a proof-of-work target
    pub fn is_valid(&self) -> bool {
        !self.negative && !self.overflow && !self.target.is_zero()
    }
}

/// ExpandTarget: ℕ₃₂ → ℕ₂₅₆
///
/// bits = size (1 byte) ‖ mantissa (3 bytes, sign bit 0x00800000):
/// target = mantissa × 256^(size − 3)
pub fn expand_target(bits: u32) -> CompactTarget {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;

    let overflow = word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));
    let negative = word != 0 && bits & 0x0080_0000 != 0;
    if overflow {
        return CompactTarget {
            target: U256::zero(),
            negative,
            overflow,
        };
    }

    let target = if size <= 3 {
        word >>= 8 * (3 - size);
        U256::from(word)
    } else {
        U256::from(word) << (8 * (size - 3)) as usize
    };
    CompactTarget {
        target,
        negative,
        overflow,
    }
}

/// CompressTarget: ℕ₂₅₆ → ℕ₃₂, the inverse of [`expand_target`] up to
/// mantissa truncation
pub fn compress_target(target: U256) -> u32 {
    let mut size = target.bits().div_ceil(8) as u32;
    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3)) as usize).low_u64() as u32
    };
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | (size << 24)
}

/// Expected number of hashes for a header at `bits`: 2^256 / (target + 1)
pub fn block_proof(bits: u32) -> U256 {
    let compact = expand_target(bits);
    if !compact.is_valid() {
        return U256::zero();
    }
    // 2^256 / (t + 1) == ~t / (t + 1) + 1 without overflowing 256 bits
    (!compact.target / (compact.target + U256::one())) + U256::one()
}

/// Header hash as a number
pub fn hash_to_u256(hash: &Hash) -> U256 {
    U256::from_little_endian(hash)
}

/// CheckProofOfWork: ℋ → {true, false}
///
/// 1. Reject negative, zero, overflowing or above-limit targets
/// 2. Return hash(h) ≤ ExpandTarget(h.bits)
pub fn check_proof_of_work(header: &BlockHeader, params: &ChainParams) -> Result<bool> {
    let compact = expand_target(header.bits);
    if !compact.is_valid() || compact.target > params.pow_limit {
        return Err(ChainError::InvalidProofOfWork(format!(
            "bits {:#010x} do not encode a usable target",
            header.bits
        )));
    }
    Ok(hash_to_u256(&header.hash()) <= compact.target)
}

/// CalculateNextWorkRequired: ℕ₃₂ × ℕ × ℕ → ℕ₃₂
///
/// 1. Let span = clamp(last_time − first_time, timespan/4, timespan×4)
/// 2. Let target = ExpandTarget(last_bits) × span / timespan
/// 3. Return CompressTarget(min(target, pow_limit))
pub fn calculate_next_work_required(
    last_bits: u32,
    first_block_time: u32,
    last_block_time: u32,
    params: &ChainParams,
) -> u32 {
    if params.no_retargeting {
        return last_bits;
    }
    let timespan = params.target_timespan as i64;
    let actual = (last_block_time as i64 - first_block_time as i64).clamp(timespan / 4, timespan * 4);

    let target = expand_target(last_bits).target;
    let new_target = target
        .checked_mul(U256::from(actual as u64))
        .map(|t| t / U256::from(timespan as u64))
        .unwrap_or(params.pow_limit);
    compress_target(new_target.min(params.pow_limit))
}

/// GetNextWorkRequired: the bits a header following `tip` must carry.
///
/// `ancestor_at` resolves headers of the chain ending at `tip` by height.
/// Returns `None` when a header the rule depends on is not reachable, in
/// which case only the header's own proof of work can be checked.
pub fn get_next_work_required<'a, F>(
    tip: &BlockHeader,
    tip_height: u32,
    new_header: &BlockHeader,
    params: &ChainParams,
    ancestor_at: F,
) -> Option<u32>
where
    F: Fn(u32) -> Option<&'a BlockHeader>,
{
    let interval = params.difficulty_adjustment_interval;
    let height = tip_height + 1;

    if height % interval != 0 {
        if params.allow_min_difficulty_blocks {
            let limit_bits = params.pow_limit_bits();
            if new_header.timestamp > tip.timestamp.saturating_add(params.target_spacing * 2) {
                return Some(limit_bits);
            }
            // Last header that was not mined under the minimum-difficulty rule
            let mut current_height = tip_height;
            let mut current_bits = tip.bits;
            while current_height > 0 && current_height % interval != 0 && current_bits == limit_bits {
                current_height -= 1;
                current_bits = ancestor_at(current_height)?.bits;
            }
            return Some(current_bits);
        }
        return Some(tip.bits);
    }

    if params.no_retargeting {
        return Some(tip.bits);
    }
    let first = ancestor_at(height - interval)?;
    Some(calculate_next_work_required(
        tip.bits,
        first.timestamp,
        tip.timestamp,
        params,
    ))
}
