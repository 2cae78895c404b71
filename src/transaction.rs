//! Transaction encoding: canonical serialization with and without witness
//! data, identifiers, sizes and lock-time derivation

use crate::constants::*;
use crate::crypto::double_sha256;
use crate::error::{ChainError, Result};
use crate::script::{decode_script_num, parse_script, ScriptToken};
use crate::serialization::{compact_size_len, write_compact_size, write_var_bytes, ByteReader};
use crate::types::*;

/// BIP144 marker and flag following the version of a segwit transaction
const SEGWIT_MARKER: u8 = 0x00;
const SEGWIT_FLAG: u8 = 0x01;

/// Maximum byte length of a lock-time script number
const LOCKTIME_NUM_MAX_LEN: usize = 5;

impl OutPoint {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.hash);
        out.extend_from_slice(&self.index.to_le_bytes());
    }

    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            hash: reader.read_hash()?,
            index: reader.read_u32_le()?,
        })
    }
}

impl TransactionInput {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        self.prevout.write_to(out);
        write_var_bytes(out, &self.script_sig);
        out.extend_from_slice(&self.sequence.to_le_bytes());
    }

    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            prevout: OutPoint::read_from(reader)?,
            script_sig: reader.read_var_bytes()?,
            sequence: reader.read_u32_le()?,
        })
    }
}

impl TransactionOutput {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(out, &self.script_pubkey);
    }

    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            value: reader.read_i64_le()?,
            script_pubkey: reader.read_var_bytes()?,
        })
    }

    /// value (8) ‖ compact_size(|spk|) ‖ spk
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.script_pubkey.len());
        self.write_to(&mut out);
        out
    }
}

impl Witness {
    /// Item count followed by each compact-size-prefixed item
    pub fn write_to(&self, out: &mut Vec<u8>) {
        write_compact_size(out, self.stack.len() as u64);
        for item in &self.stack {
            write_var_bytes(out, item);
        }
    }

    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let count = reader.read_count()?;
        let mut stack = Vec::with_capacity(count);
        for _ in 0..count {
            stack.push(reader.read_var_bytes()?);
        }
        Ok(Self { stack })
    }

    pub fn serialized_size(&self) -> usize {
        compact_size_len(self.stack.len() as u64)
            + self
                .stack
                .iter()
                .map(|item| compact_size_len(item.len() as u64) + item.len())
                .sum::<usize>()
    }
}

impl Transaction {
    /// Serialize: BIP144 encoding iff any witness stack is non-empty
    pub fn serialize(&self) -> Vec<u8> {
        self.encode(self.has_witness())
    }

    /// Serialize without marker, flag and witnesses (the txid encoding)
    pub fn serialize_without_witness(&self) -> Vec<u8> {
        self.encode(false)
    }

    fn encode(&self, with_witness: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.base_size());
        out.extend_from_slice(&self.version.to_le_bytes());
        if with_witness {
            out.push(SEGWIT_MARKER);
            out.push(SEGWIT_FLAG);
        }
        write_compact_size(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(&mut out);
        }
        write_compact_size(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(&mut out);
        }
        if with_witness {
            let empty = Witness::empty();
            for i in 0..self.inputs.len() {
                self.witnesses.get(i).unwrap_or(&empty).write_to(&mut out);
            }
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Parse a complete transaction, rejecting trailing bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let tx = Self::read_from(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }

    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let version = reader.read_i32_le()?;

        let segwit = reader.peek() == Some(SEGWIT_MARKER) && reader.peek_at(1) == Some(SEGWIT_FLAG);
        if segwit {
            reader.read_bytes(2)?;
        }

        let input_count = reader.read_count()?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TransactionInput::read_from(reader)?);
        }

        let output_count = reader.read_count()?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TransactionOutput::read_from(reader)?);
        }

        let mut witnesses = Vec::new();
        if segwit {
            for _ in 0..input_count {
                witnesses.push(Witness::read_from(reader)?);
            }
            if witnesses.iter().all(Witness::is_empty) {
                return Err(ChainError::Serialization(
                    "superfluous witness record".to_string(),
                ));
            }
        }

        let lock_time = reader.read_u32_le()?;
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
            witnesses,
        })
    }

    /// Transaction id: double-SHA256 of the witness-stripped encoding
    pub fn txid(&self) -> Hash {
        double_sha256(&self.serialize_without_witness())
    }

    /// Witness transaction id; equal to the txid without witness data
    pub fn wtxid(&self) -> Hash {
        double_sha256(&self.serialize())
    }

    /// Size of the witness-stripped encoding
    pub fn base_size(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|i| 36 + compact_size_len(i.script_sig.len() as u64) + i.script_sig.len() + 4)
            .sum();
        let outputs: usize = self
            .outputs
            .iter()
            .map(|o| 8 + compact_size_len(o.script_pubkey.len() as u64) + o.script_pubkey.len())
            .sum();
        4 + compact_size_len(self.inputs.len() as u64)
            + inputs
            + compact_size_len(self.outputs.len() as u64)
            + outputs
            + 4
    }

    /// Size of the full encoding, witness included
    pub fn total_size(&self) -> usize {
        if !self.has_witness() {
            return self.base_size();
        }
        let witness: usize = (0..self.inputs.len())
            .map(|i| self.witnesses.get(i).map_or(1, Witness::serialized_size))
            .sum();
        self.base_size() + 2 + witness
    }

    /// Weight: base_size × 3 + total_size
    pub fn weight(&self) -> usize {
        self.base_size() * (WITNESS_SCALE_FACTOR - 1) + self.total_size()
    }

    /// Virtual size: ⌈weight / 4⌉
    pub fn vsize(&self) -> usize {
        self.weight().div_ceil(WITNESS_SCALE_FACTOR)
    }

    /// Check if transaction is coinbase
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout == OutPoint::NULL
    }
}

/// Lock-time kind of an absolute lock value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    Height,
    Time,
}

fn lock_kind(value: u32) -> LockKind {
    if value < LOCKTIME_THRESHOLD {
        LockKind::Height
    } else {
        LockKind::Time
    }
}

/// CLTV requirement of a script of the form `<n> OP_CHECKLOCKTIMEVERIFY OP_DROP ...`
pub fn cltv_requirement(script: &[u8]) -> Result<Option<u32>> {
    let tokens = parse_script(script)?;
    match tokens.as_slice() {
        [lock, ScriptToken::Op(OP_CHECKLOCKTIMEVERIFY), ScriptToken::Op(OP_DROP), ..] => {
            let value = match lock {
                ScriptToken::Op(OP_0) => 0,
                ScriptToken::Op(op) if (OP_1..=OP_16).contains(op) => (*op - OP_1 + 1) as i64,
                ScriptToken::Push { data, .. } => decode_script_num(data, LOCKTIME_NUM_MAX_LEN)?,
                _ => {
                    return Err(ChainError::InvalidScript(
                        "CLTV script does not start with a number".to_string(),
                    ))
                }
            };
            let value = u32::try_from(value).map_err(|_| {
                ChainError::InvalidScript(format!("lock time {value} out of range"))
            })?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

/// CalcLockTime: 𝒮* → ℕ₃₂
///
/// For the scripts being spent:
/// 1. Collect every CLTV requirement n
/// 2. If requirements mix heights (n < 500000000) and times: fail
/// 3. Return max(n), or 0 when nothing is time-locked
pub fn calc_lock_time<S: AsRef<[u8]>>(spending_scripts: &[S]) -> Result<u32> {
    let mut result: Option<u32> = None;
    for script in spending_scripts {
        let Some(required) = cltv_requirement(script.as_ref())? else {
            continue;
        };
        result = match result {
            None => Some(required),
            Some(current) if lock_kind(current) != lock_kind(required) => {
                return Err(ChainError::IncompatibleLockTimes(format!(
                    "cannot combine lock time {current} with {required}"
                )))
            }
            Some(current) => Some(current.max(required)),
        };
    }
    Ok(result.unwrap_or(0))
}
