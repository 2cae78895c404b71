//! Signature hashing: legacy, BIP143 segwit v0 and BIP341 taproot
//!
//! Each signature version has a preimage builder taking an explicit script
//! code, and [`serialize_for_signature`] / [`hash_for_signature`] resolve the
//! script code from the funding output and the spending input.
//!
//! Legacy hashing never fails on an out-of-range input or a `SIGHASH_SINGLE`
//! without a matching output: it yields [`ERROR_HASH`], the value consensus
//! has always signed in that case.

use crate::constants::*;
use crate::crypto::{double_sha256, sha256, tagged_hash, ZERO_HASH};
use crate::error::{ChainError, Result};
use crate::script::{classify_script, last_push, p2pkh_script, remove_code_separators, witness_program, ScriptType};
use crate::serialization::{write_compact_size, write_var_bytes};
use crate::taproot::{annex_hash, annex_of, tap_leaf_hash, ControlBlock};
use crate::types::*;
use crate::witness::ScriptWitness;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// uint256 one, little-endian: the legacy "cannot sign" digest
pub const ERROR_HASH: Hash = {
    let mut hash = [0u8; 32];
    hash[0] = 1;
    hash
};

/// Key version committed by BIP342 script-path signatures
const TAPROOT_KEY_VERSION: u8 = 0x00;

/// Sighash epoch prefixed to every taproot message
const TAPROOT_SIGHASH_EPOCH: u8 = 0x00;

/// Signature hash type, keeping the raw code it was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashType {
    /// Taproot-only 0x00, signs like ALL
    Default,
    All(u32),
    None(u32),
    Single(u32),
    AllAnyoneCanPay(u32),
    NoneAnyoneCanPay(u32),
    SingleAnyoneCanPay(u32),
}

/// Base behaviour of a hash type, ignoring ANYONECANPAY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseHashType {
    All,
    None,
    Single,
}

impl HashType {
    pub const ALL: HashType = HashType::All(SIGHASH_ALL);
    pub const NONE: HashType = HashType::None(SIGHASH_NONE);
    pub const SINGLE: HashType = HashType::Single(SIGHASH_SINGLE);
    pub const ALL_ANYONECANPAY: HashType = HashType::AllAnyoneCanPay(SIGHASH_ALL | SIGHASH_ANYONECANPAY);
    pub const NONE_ANYONECANPAY: HashType = HashType::NoneAnyoneCanPay(SIGHASH_NONE | SIGHASH_ANYONECANPAY);
    pub const SINGLE_ANYONECANPAY: HashType =
        HashType::SingleAnyoneCanPay(SIGHASH_SINGLE | SIGHASH_ANYONECANPAY);

    /// Decode a raw code. Unknown base types sign like ALL, as consensus does.
    pub fn from_u32(code: u32) -> Self {
        if code == SIGHASH_DEFAULT {
            return HashType::Default;
        }
        let acp = code & SIGHASH_ANYONECANPAY != 0;
        match (code & SIGHASH_BASE_MASK, acp) {
            (SIGHASH_NONE, false) => HashType::None(code),
            (SIGHASH_SINGLE, false) => HashType::Single(code),
            (_, false) => HashType::All(code),
            (SIGHASH_NONE, true) => HashType::NoneAnyoneCanPay(code),
            (SIGHASH_SINGLE, true) => HashType::SingleAnyoneCanPay(code),
            (_, true) => HashType::AllAnyoneCanPay(code),
        }
    }

    /// Decode the byte appended to a signature
    pub fn from_byte(byte: u8) -> Self {
        Self::from_u32(byte as u32)
    }

    /// Raw 32-bit code
    pub fn num(&self) -> u32 {
        match *self {
            HashType::Default => SIGHASH_DEFAULT,
            HashType::All(n)
            | HashType::None(n)
            | HashType::Single(n)
            | HashType::AllAnyoneCanPay(n)
            | HashType::NoneAnyoneCanPay(n)
            | HashType::SingleAnyoneCanPay(n) => n,
        }
    }

    pub fn byte(&self) -> u8 {
        self.num() as u8
    }

    pub fn base(&self) -> BaseHashType {
        match self {
            HashType::Default | HashType::All(_) | HashType::AllAnyoneCanPay(_) => BaseHashType::All,
            HashType::None(_) | HashType::NoneAnyoneCanPay(_) => BaseHashType::None,
            HashType::Single(_) | HashType::SingleAnyoneCanPay(_) => BaseHashType::Single,
        }
    }

    pub fn is_anyone_can_pay(&self) -> bool {
        matches!(
            self,
            HashType::AllAnyoneCanPay(_) | HashType::NoneAnyoneCanPay(_) | HashType::SingleAnyoneCanPay(_)
        )
    }

    pub fn is_none(&self) -> bool {
        self.base() == BaseHashType::None
    }

    pub fn is_single(&self) -> bool {
        self.base() == BaseHashType::Single
    }

    /// Codes BIP341 accepts: 0x00..=0x03 and 0x81..=0x83
    pub fn is_valid_taproot(&self) -> bool {
        matches!(self.num(), 0x00..=0x03 | 0x81..=0x83)
    }
}

impl Default for HashType {
    fn default() -> Self {
        HashType::ALL
    }
}

/// Signature version selecting the preimage algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigVersion {
    Base,
    WitnessV0,
    TaprootKeyPath,
    TaprootScriptPath,
}

impl SigVersion {
    /// Signature version of a spend of `script_pubkey` by an input carrying
    /// `script_sig` and `witness`
    pub fn for_spend(script_pubkey: &[u8], script_sig: &[u8], witness: &Witness) -> SigVersion {
        match classify_script(script_pubkey) {
            ScriptType::P2tr => match ScriptWitness::from_witness(witness) {
                ScriptWitness::TaprootScriptPath { .. } => SigVersion::TaprootScriptPath,
                _ => SigVersion::TaprootKeyPath,
            },
            ScriptType::P2wpkh | ScriptType::P2wsh => SigVersion::WitnessV0,
            ScriptType::P2sh => {
                let nested_v0 = last_push(script_sig)
                    .as_deref()
                    .and_then(witness_program)
                    .is_some_and(|(version, _)| version == 0);
                if nested_v0 {
                    SigVersion::WitnessV0
                } else {
                    SigVersion::Base
                }
            }
            _ => SigVersion::Base,
        }
    }

    pub fn is_taproot(&self) -> bool {
        matches!(self, SigVersion::TaprootKeyPath | SigVersion::TaprootScriptPath)
    }
}

/// Extra inputs of a taproot signature hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaprootSigHashOptions {
    pub annex_hash: Option<Hash>,
    /// Required for script-path spends
    pub tap_leaf_hash: Option<Hash>,
    /// Opcode position of the last executed OP_CODESEPARATOR, 0xffffffff if none
    pub code_separator_position: u32,
}

impl Default for TaprootSigHashOptions {
    fn default() -> Self {
        Self {
            annex_hash: None,
            tap_leaf_hash: None,
            code_separator_position: u32::MAX,
        }
    }
}

impl TaprootSigHashOptions {
    pub fn have_annex(&self) -> bool {
        self.annex_hash.is_some()
    }

    /// Options derived from a taproot witness: the annex hash, and the leaf
    /// hash of the revealed script for script-path spends
    pub fn from_witness(witness: &Witness) -> Self {
        let annex_hash = annex_of(&witness.stack).map(|annex| annex_hash(annex));
        let tap_leaf_hash = match ScriptWitness::from_witness(witness) {
            ScriptWitness::TaprootScriptPath {
                script,
                control_block,
                ..
            } => ControlBlock::parse(&control_block)
                .ok()
                .map(|cb| tap_leaf_hash(cb.leaf_version, &script)),
            _ => None,
        };
        Self {
            annex_hash,
            tap_leaf_hash,
            ..Self::default()
        }
    }
}

fn check_input_index(tx: &Transaction, input_index: usize) -> Result<()> {
    if input_index >= tx.inputs.len() {
        return Err(ChainError::InvalidInputIndex {
            index: input_index,
            inputs: tx.inputs.len(),
        });
    }
    Ok(())
}

/// LegacyPreimage: 𝒯𝒳 × ℕ × 𝒮 × ℋ𝒯 → 𝔹* ∪ {⊥}
///
/// 1. If i ≥ |ins|, or SINGLE with i ≥ |outs|: return ⊥ (signs ERROR_HASH)
/// 2. Blank every script_sig; input i gets the script code without OP_CODESEPARATOR
/// 3. NONE: no outputs; SINGLE: outputs 0..=i, those before i nulled
/// 4. NONE or SINGLE: sequences of other inputs zeroed
/// 5. ANYONECANPAY: input i only
/// 6. Append the hash type as 4 bytes LE
pub fn legacy_preimage(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    hash_type: HashType,
) -> Option<Vec<u8>> {
    if input_index >= tx.inputs.len() {
        return None;
    }
    let base = hash_type.base();
    if base == BaseHashType::Single && input_index >= tx.outputs.len() {
        return None;
    }

    let script_code = remove_code_separators(script_code);
    let mut out = Vec::with_capacity(tx.base_size() + script_code.len() + 4);
    out.extend_from_slice(&tx.version.to_le_bytes());

    let signed_input = |i: usize, input: &TransactionInput| TransactionInput {
        prevout: input.prevout,
        script_sig: if i == input_index {
            script_code.clone()
        } else {
            Vec::new()
        },
        sequence: if i != input_index && base != BaseHashType::All {
            0
        } else {
            input.sequence
        },
    };

    if hash_type.is_anyone_can_pay() {
        write_compact_size(&mut out, 1);
        signed_input(input_index, &tx.inputs[input_index]).write_to(&mut out);
    } else {
        write_compact_size(&mut out, tx.inputs.len() as u64);
        for (i, input) in tx.inputs.iter().enumerate() {
            signed_input(i, input).write_to(&mut out);
        }
    }

    match base {
        BaseHashType::None => write_compact_size(&mut out, 0),
        BaseHashType::Single => {
            write_compact_size(&mut out, (input_index + 1) as u64);
            for _ in 0..input_index {
                TransactionOutput::null().write_to(&mut out);
            }
            tx.outputs[input_index].write_to(&mut out);
        }
        BaseHashType::All => {
            write_compact_size(&mut out, tx.outputs.len() as u64);
            for output in &tx.outputs {
                output.write_to(&mut out);
            }
        }
    }

    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    out.extend_from_slice(&hash_type.num().to_le_bytes());
    Some(out)
}

/// WitnessV0Preimage: 𝒯𝒳 × ℕ × 𝒮 × ℤ × ℋ𝒯 → 𝔹*
///
/// version ‖ hashPrevouts ‖ hashSequence ‖ outpoint ‖ script_code ‖ amount
/// ‖ sequence ‖ hashOutputs ‖ lock_time ‖ hash_type
pub fn witness_v0_preimage(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    amount: i64,
    hash_type: HashType,
) -> Result<Vec<u8>> {
    check_input_index(tx, input_index)?;
    let base = hash_type.base();
    let acp = hash_type.is_anyone_can_pay();

    let hash_prevouts = if acp {
        ZERO_HASH
    } else {
        let mut data = Vec::with_capacity(36 * tx.inputs.len());
        for input in &tx.inputs {
            input.prevout.write_to(&mut data);
        }
        double_sha256(&data)
    };

    let hash_sequence = if acp || base != BaseHashType::All {
        ZERO_HASH
    } else {
        let data: Vec<u8> = tx.inputs.iter().flat_map(|i| i.sequence.to_le_bytes()).collect();
        double_sha256(&data)
    };

    let hash_outputs = match base {
        BaseHashType::All => {
            let mut data = Vec::new();
            for output in &tx.outputs {
                output.write_to(&mut data);
            }
            double_sha256(&data)
        }
        BaseHashType::Single if input_index < tx.outputs.len() => {
            double_sha256(&tx.outputs[input_index].serialize())
        }
        _ => ZERO_HASH,
    };

    let input = &tx.inputs[input_index];
    let mut out = Vec::with_capacity(156 + script_code.len() + 9);
    out.extend_from_slice(&tx.version.to_le_bytes());
    out.extend_from_slice(&hash_prevouts);
    out.extend_from_slice(&hash_sequence);
    input.prevout.write_to(&mut out);
    write_var_bytes(&mut out, script_code);
    out.extend_from_slice(&amount.to_le_bytes());
    out.extend_from_slice(&input.sequence.to_le_bytes());
    out.extend_from_slice(&hash_outputs);
    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    out.extend_from_slice(&hash_type.num().to_le_bytes());
    Ok(out)
}

/// TaprootPreimage: 𝒯𝒳 × ℕ × 𝒪* × ℋ𝒯 × 𝒪𝓅𝓉 → 𝔹*
///
/// epoch 0x00 ‖ SigMsg in BIP341 order, followed for script-path spends by
/// tapleaf_hash ‖ key_version ‖ codesep_pos.
pub fn taproot_preimage(
    tx: &Transaction,
    input_index: usize,
    prevouts: &[TransactionOutput],
    hash_type: HashType,
    script_path: bool,
    options: &TaprootSigHashOptions,
) -> Result<Vec<u8>> {
    if !hash_type.is_valid_taproot() {
        return Err(ChainError::InvalidHashType(hash_type.num()));
    }
    check_input_index(tx, input_index)?;
    if prevouts.len() != tx.inputs.len() {
        return Err(ChainError::PrevoutCountMismatch {
            expected: tx.inputs.len(),
            found: prevouts.len(),
        });
    }
    let base = hash_type.base();
    let acp = hash_type.is_anyone_can_pay();

    let mut out = Vec::with_capacity(256);
    out.push(TAPROOT_SIGHASH_EPOCH);

    // Transaction data
    out.push(hash_type.byte());
    out.extend_from_slice(&tx.version.to_le_bytes());
    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    if !acp {
        let mut outpoints = Vec::with_capacity(36 * tx.inputs.len());
        let mut amounts = Vec::with_capacity(8 * prevouts.len());
        let mut script_pubkeys = Vec::new();
        let mut sequences = Vec::with_capacity(4 * tx.inputs.len());
        for (input, prevout) in tx.inputs.iter().zip(prevouts) {
            input.prevout.write_to(&mut outpoints);
            amounts.extend_from_slice(&prevout.value.to_le_bytes());
            write_var_bytes(&mut script_pubkeys, &prevout.script_pubkey);
            sequences.extend_from_slice(&input.sequence.to_le_bytes());
        }
        out.extend_from_slice(&sha256(&outpoints));
        out.extend_from_slice(&sha256(&amounts));
        out.extend_from_slice(&sha256(&script_pubkeys));
        out.extend_from_slice(&sha256(&sequences));
    }
    if base == BaseHashType::All {
        let mut outputs = Vec::new();
        for output in &tx.outputs {
            output.write_to(&mut outputs);
        }
        out.extend_from_slice(&sha256(&outputs));
    }

    // Data about this input
    let spend_type = (script_path as u8) * 2 + options.have_annex() as u8;
    out.push(spend_type);
    if acp {
        let input = &tx.inputs[input_index];
        let prevout = &prevouts[input_index];
        input.prevout.write_to(&mut out);
        out.extend_from_slice(&prevout.value.to_le_bytes());
        write_var_bytes(&mut out, &prevout.script_pubkey);
        out.extend_from_slice(&input.sequence.to_le_bytes());
    } else {
        out.extend_from_slice(&(input_index as u32).to_le_bytes());
    }
    if let Some(annex_hash) = options.annex_hash {
        out.extend_from_slice(&annex_hash);
    }

    // Data about this output
    if base == BaseHashType::Single {
        let output = tx.outputs.get(input_index).ok_or(ChainError::InvalidInputIndex {
            index: input_index,
            inputs: tx.outputs.len(),
        })?;
        out.extend_from_slice(&sha256(&output.serialize()));
    }

    // BIP342 extension
    if script_path {
        let leaf_hash = options.tap_leaf_hash.ok_or_else(|| {
            ChainError::InvalidArgument("script-path signature hash needs a tapleaf hash".to_string())
        })?;
        out.extend_from_slice(&leaf_hash);
        out.push(TAPROOT_KEY_VERSION);
        out.extend_from_slice(&options.code_separator_position.to_le_bytes());
    }

    Ok(out)
}

/// Script code committed by a segwit v0 spend
fn witness_v0_script_code(tx: &Transaction, input_index: usize, script_pubkey: &[u8]) -> Result<Vec<u8>> {
    let nested;
    let program_script: &[u8] = if classify_script(script_pubkey) == ScriptType::P2sh {
        nested = last_push(&tx.inputs[input_index].script_sig).unwrap_or_default();
        &nested
    } else {
        script_pubkey
    };

    match witness_program(program_script) {
        Some((0, program)) if program.len() == 20 => {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(program);
            Ok(p2pkh_script(&hash))
        }
        Some((0, program)) if program.len() == 32 => {
            let witness_script = tx
                .witness(input_index)
                .and_then(Witness::last)
                .ok_or_else(|| ChainError::InvalidScript(format!("input {input_index} has no witness script")))?;
            if sha256(witness_script) != program {
                return Err(ChainError::InvalidScript(
                    "witness script does not match P2WSH program".to_string(),
                ));
            }
            Ok(witness_script.clone())
        }
        _ => Ok(program_script.to_vec()),
    }
}

/// Script code committed by a legacy spend: the redeem script for P2SH
fn legacy_script_code(tx: &Transaction, input_index: usize, script_pubkey: &[u8]) -> Vec<u8> {
    if classify_script(script_pubkey) == ScriptType::P2sh {
        if let Some(redeem) = last_push(&tx.inputs[input_index].script_sig) {
            return redeem;
        }
    }
    script_pubkey.to_vec()
}

fn single_funding_output(funding_outputs: &[TransactionOutput]) -> Result<&TransactionOutput> {
    match funding_outputs {
        [output] => Ok(output),
        _ => Err(ChainError::PrevoutCountMismatch {
            expected: 1,
            found: funding_outputs.len(),
        }),
    }
}

/// SerializeForSignature: the exact bytes hashed for the signature.
///
/// The legacy cases that sign [`ERROR_HASH`] return its bytes.
pub fn serialize_for_signature(
    tx: &Transaction,
    input_index: usize,
    funding_outputs: &[TransactionOutput],
    hash_type: HashType,
    sig_version: SigVersion,
    taproot_options: &TaprootSigHashOptions,
) -> Result<Vec<u8>> {
    match sig_version {
        SigVersion::Base => {
            if input_index >= tx.inputs.len() {
                return Ok(ERROR_HASH.to_vec());
            }
            let funding = single_funding_output(funding_outputs)?;
            let script_code = legacy_script_code(tx, input_index, &funding.script_pubkey);
            Ok(legacy_preimage(tx, input_index, &script_code, hash_type).unwrap_or_else(|| ERROR_HASH.to_vec()))
        }
        SigVersion::WitnessV0 => {
            check_input_index(tx, input_index)?;
            let funding = single_funding_output(funding_outputs)?;
            let script_code = witness_v0_script_code(tx, input_index, &funding.script_pubkey)?;
            witness_v0_preimage(tx, input_index, &script_code, funding.value, hash_type)
        }
        SigVersion::TaprootKeyPath => {
            taproot_preimage(tx, input_index, funding_outputs, hash_type, false, taproot_options)
        }
        SigVersion::TaprootScriptPath => {
            let mut options = *taproot_options;
            if options.tap_leaf_hash.is_none() {
                options.tap_leaf_hash = tx
                    .witness(input_index)
                    .and_then(|w| TaprootSigHashOptions::from_witness(w).tap_leaf_hash);
            }
            taproot_preimage(tx, input_index, funding_outputs, hash_type, true, &options)
        }
    }
}

/// HashForSignature: 𝒯𝒳 × ℕ × 𝒪* × ℋ𝒯 × 𝒮𝒱 × 𝒪𝓅𝓉 → ℍ
///
/// double-SHA256 of the preimage for Base and WitnessV0, tagged
/// "TapSighash" hash for taproot.
pub fn hash_for_signature(
    tx: &Transaction,
    input_index: usize,
    funding_outputs: &[TransactionOutput],
    hash_type: HashType,
    sig_version: SigVersion,
    taproot_options: &TaprootSigHashOptions,
) -> Result<Hash> {
    if sig_version == SigVersion::Base {
        let legacy = if input_index < tx.inputs.len() {
            let funding = single_funding_output(funding_outputs)?;
            let script_code = legacy_script_code(tx, input_index, &funding.script_pubkey);
            legacy_preimage(tx, input_index, &script_code, hash_type)
        } else {
            None
        };
        return Ok(match legacy {
            Some(preimage) => double_sha256(&preimage),
            None => {
                debug!(
                    input_index,
                    inputs = tx.inputs.len(),
                    outputs = tx.outputs.len(),
                    "legacy sighash has no valid serialization, signing the error hash"
                );
                ERROR_HASH
            }
        });
    }

    let preimage = serialize_for_signature(
        tx,
        input_index,
        funding_outputs,
        hash_type,
        sig_version,
        taproot_options,
    )?;
    trace!(?sig_version, preimage = %hex::encode(&preimage), "signature preimage");
    Ok(if sig_version.is_taproot() {
        tagged_hash("TapSighash", &preimage)
    } else {
        double_sha256(&preimage)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{p2tr_script, p2wsh_script, push_data};
    use crate::taproot::is_annex;

    fn input(n: u8, sequence: u32) -> TransactionInput {
        TransactionInput {
            prevout: OutPoint::new([n; 32], n as u32),
            script_sig: vec![0x51, n],
            sequence,
        }
    }

    fn output(value: i64) -> TransactionOutput {
        TransactionOutput {
            value,
            script_pubkey: vec![OP_1],
        }
    }

    fn tx(inputs: usize, outputs: usize) -> Transaction {
        Transaction {
            version: 2,
            inputs: (0..inputs).map(|i| input(i as u8 + 1, 0xffff_fff0 + i as u32)).collect(),
            outputs: (0..outputs).map(|i| output(1000 * (i as i64 + 1))).collect(),
            lock_time: 77,
            witnesses: vec![],
        }
    }

    fn funding() -> Vec<TransactionOutput> {
        vec![TransactionOutput {
            value: 5000,
            script_pubkey: vec![OP_DUP, OP_CODESEPARATOR, OP_CHECKSIG],
        }]
    }

    fn taproot_prevouts(n: usize) -> Vec<TransactionOutput> {
        (0..n)
            .map(|i| TransactionOutput {
                value: 10_000 + i as i64,
                script_pubkey: p2tr_script(&[i as u8 + 1; 32]),
            })
            .collect()
    }

    #[test]
    fn test_hash_type_decoding() {
        assert_eq!(HashType::from_u32(0), HashType::Default);
        assert_eq!(HashType::from_u32(1), HashType::ALL);
        assert_eq!(HashType::from_u32(0x83), HashType::SINGLE_ANYONECANPAY);
        assert_eq!(HashType::from_u32(0x04), HashType::All(0x04));
        assert_eq!(HashType::from_u32(0x84).num(), 0x84);
        assert!(HashType::from_u32(0x84).is_anyone_can_pay());
        assert!(HashType::from_byte(0x42).is_none());
        assert!(!HashType::from_u32(0x04).is_valid_taproot());
        assert!(HashType::Default.is_valid_taproot());
    }

    #[test]
    fn test_legacy_single_out_of_range_signs_error_hash() {
        let tx = tx(2, 1);
        let hash = hash_for_signature(&tx, 1, &funding(), HashType::SINGLE, SigVersion::Base, &Default::default())
            .unwrap();
        assert_eq!(hash, ERROR_HASH);
        let bytes =
            serialize_for_signature(&tx, 1, &funding(), HashType::SINGLE, SigVersion::Base, &Default::default())
                .unwrap();
        assert_eq!(bytes, ERROR_HASH.to_vec());
    }

    #[test]
    fn test_legacy_input_out_of_range_signs_error_hash() {
        let tx = tx(1, 1);
        let hash =
            hash_for_signature(&tx, 5, &funding(), HashType::ALL, SigVersion::Base, &Default::default()).unwrap();
        assert_eq!(hash, ERROR_HASH);
    }

    #[test]
    fn test_legacy_all_layout() {
        let tx = tx(2, 2);
        let preimage = legacy_preimage(&tx, 0, &[OP_DUP, OP_CODESEPARATOR, OP_CHECKSIG], HashType::ALL).unwrap();

        let mut expected = tx.clone();
        expected.inputs[0].script_sig = vec![OP_DUP, OP_CHECKSIG];
        expected.inputs[1].script_sig = vec![];
        let mut bytes = expected.serialize_without_witness();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        assert_eq!(preimage, bytes);
    }

    #[test]
    fn test_legacy_none_zeroes_other_sequences() {
        let tx = tx(2, 2);
        let preimage = legacy_preimage(&tx, 1, &[OP_CHECKSIG], HashType::NONE).unwrap();

        let mut expected = tx.clone();
        expected.inputs[0].script_sig = vec![];
        expected.inputs[0].sequence = 0;
        expected.inputs[1].script_sig = vec![OP_CHECKSIG];
        expected.outputs.clear();
        let mut bytes = expected.serialize_without_witness();
        bytes.extend_from_slice(&SIGHASH_NONE.to_le_bytes());
        assert_eq!(preimage, bytes);
    }

    #[test]
    fn test_legacy_single_nulls_earlier_outputs() {
        let tx = tx(2, 3);
        let preimage = legacy_preimage(&tx, 1, &[OP_CHECKSIG], HashType::SINGLE).unwrap();

        let mut expected = tx.clone();
        expected.inputs[0].script_sig = vec![];
        expected.inputs[0].sequence = 0;
        expected.inputs[1].script_sig = vec![OP_CHECKSIG];
        expected.outputs = vec![TransactionOutput::null(), tx.outputs[1].clone()];
        let mut bytes = expected.serialize_without_witness();
        bytes.extend_from_slice(&SIGHASH_SINGLE.to_le_bytes());
        assert_eq!(preimage, bytes);
    }

    #[test]
    fn test_legacy_anyone_can_pay_keeps_only_target_input() {
        let tx = tx(3, 1);
        let preimage = legacy_preimage(&tx, 2, &[OP_CHECKSIG], HashType::ALL_ANYONECANPAY).unwrap();

        let mut expected = tx.clone();
        expected.inputs = vec![TransactionInput {
            script_sig: vec![OP_CHECKSIG],
            ..tx.inputs[2].clone()
        }];
        let mut bytes = expected.serialize_without_witness();
        bytes.extend_from_slice(&0x81u32.to_le_bytes());
        assert_eq!(preimage, bytes);
    }

    #[test]
    fn test_legacy_p2sh_uses_redeem_script() {
        let redeem = vec![OP_1, OP_CHECKSIG];
        let mut tx = tx(1, 1);
        tx.inputs[0].script_sig = push_data(&redeem);
        let funding = vec![TransactionOutput {
            value: 1,
            script_pubkey: crate::script::p2sh_script(&crate::crypto::hash160(&redeem)),
        }];
        let hash = hash_for_signature(&tx, 0, &funding, HashType::ALL, SigVersion::Base, &Default::default()).unwrap();
        let direct = double_sha256(&legacy_preimage(&tx, 0, &redeem, HashType::ALL).unwrap());
        assert_eq!(hash, direct);
    }

    #[test]
    fn test_witness_v0_invalid_index() {
        let tx = tx(1, 1);
        let err = hash_for_signature(&tx, 1, &funding(), HashType::ALL, SigVersion::WitnessV0, &Default::default())
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidInputIndex { index: 1, inputs: 1 }));
    }

    #[test]
    fn test_witness_v0_single_out_of_range_uses_zero_outputs_hash() {
        let tx = tx(2, 1);
        let preimage = witness_v0_preimage(&tx, 1, &[OP_CHECKSIG], 5000, HashType::SINGLE).unwrap();
        // hashOutputs sits before lock time and hash type
        let len = preimage.len();
        assert_eq!(&preimage[len - 40..len - 8], &ZERO_HASH);
        // hashPrevouts committed, hashSequence zeroed
        assert_ne!(&preimage[4..36], &ZERO_HASH);
        assert_eq!(&preimage[36..68], &ZERO_HASH);
    }

    #[test]
    fn test_witness_v0_p2wsh_script_mismatch() {
        let mut tx = tx(1, 1);
        tx.witnesses = vec![Witness::new(vec![vec![OP_1]])];
        let funding = vec![TransactionOutput {
            value: 1,
            script_pubkey: p2wsh_script(&[0x52]),
        }];
        let err = hash_for_signature(&tx, 0, &funding, HashType::ALL, SigVersion::WitnessV0, &Default::default())
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidScript(_)));
    }

    #[test]
    fn test_witness_v0_p2wsh_uses_witness_script() {
        let witness_script = vec![OP_1, OP_CODESEPARATOR, OP_CHECKSIG];
        let mut tx = tx(1, 1);
        tx.witnesses = vec![Witness::new(vec![vec![0x30], witness_script.clone()])];
        let funding = vec![TransactionOutput {
            value: 42,
            script_pubkey: p2wsh_script(&witness_script),
        }];
        let bytes =
            serialize_for_signature(&tx, 0, &funding, HashType::ALL, SigVersion::WitnessV0, &Default::default())
                .unwrap();
        assert_eq!(bytes, witness_v0_preimage(&tx, 0, &witness_script, 42, HashType::ALL).unwrap());
    }

    fn taproot_message_len(preimage: &[u8]) -> usize {
        preimage.len() - 1
    }

    #[test]
    fn test_taproot_message_lengths() {
        let tx = tx(2, 2);
        let prevouts = taproot_prevouts(2);
        let annex = TaprootSigHashOptions {
            annex_hash: Some([9u8; 32]),
            ..Default::default()
        };
        for code in [0x00u32, 0x01, 0x02, 0x03, 0x81, 0x82, 0x83] {
            let hash_type = HashType::from_u32(code);
            for options in [TaprootSigHashOptions::default(), annex] {
                let preimage = taproot_preimage(&tx, 1, &prevouts, hash_type, false, &options).unwrap();
                let expected = 174 - 49 * hash_type.is_anyone_can_pay() as usize
                    - 32 * hash_type.is_none() as usize
                    + 32 * options.have_annex() as usize;
                assert_eq!(taproot_message_len(&preimage), expected, "hash type {code:#x}");
            }
        }
    }

    #[test]
    fn test_taproot_script_path_extension() {
        let tx = tx(1, 1);
        let prevouts = taproot_prevouts(1);
        let options = TaprootSigHashOptions {
            tap_leaf_hash: Some([3u8; 32]),
            ..Default::default()
        };
        let key_path = taproot_preimage(&tx, 0, &prevouts, HashType::Default, false, &options).unwrap();
        let script_path = taproot_preimage(&tx, 0, &prevouts, HashType::Default, true, &options).unwrap();
        assert_eq!(script_path.len(), key_path.len() + 37);
        assert_eq!(&script_path[script_path.len() - 4..], &[0xff; 4]);
        assert_eq!(script_path[script_path.len() - 5], TAPROOT_KEY_VERSION);
    }

    #[test]
    fn test_taproot_script_path_needs_leaf_hash() {
        let tx = tx(1, 1);
        let err = taproot_preimage(&tx, 0, &taproot_prevouts(1), HashType::ALL, true, &Default::default())
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidArgument(_)));
    }

    #[test]
    fn test_taproot_errors() {
        let tx = tx(2, 1);
        let prevouts = taproot_prevouts(2);
        let none = TaprootSigHashOptions::default();
        assert!(matches!(
            taproot_preimage(&tx, 0, &prevouts, HashType::from_u32(0x04), false, &none),
            Err(ChainError::InvalidHashType(0x04))
        ));
        assert!(matches!(
            taproot_preimage(&tx, 2, &prevouts, HashType::ALL, false, &none),
            Err(ChainError::InvalidInputIndex { .. })
        ));
        assert!(matches!(
            taproot_preimage(&tx, 0, &prevouts[..1], HashType::ALL, false, &none),
            Err(ChainError::PrevoutCountMismatch { expected: 2, found: 1 })
        ));
        assert!(matches!(
            taproot_preimage(&tx, 1, &prevouts, HashType::SINGLE, false, &none),
            Err(ChainError::InvalidInputIndex { .. })
        ));
    }

    #[test]
    fn test_taproot_anyone_can_pay_ignores_other_inputs() {
        let tx_a = tx(2, 2);
        let mut tx_b = tx_a.clone();
        tx_b.inputs[0].prevout.index = 99;
        let mut prevouts_b = taproot_prevouts(2);
        prevouts_b[0].value = 1;

        let opts = TaprootSigHashOptions::default();
        let ht = HashType::ALL_ANYONECANPAY;
        let a = hash_for_signature(&tx_a, 1, &taproot_prevouts(2), ht, SigVersion::TaprootKeyPath, &opts).unwrap();
        let b = hash_for_signature(&tx_b, 1, &prevouts_b, ht, SigVersion::TaprootKeyPath, &opts).unwrap();
        assert_eq!(a, b);

        let all_a = hash_for_signature(&tx_a, 1, &taproot_prevouts(2), HashType::ALL, SigVersion::TaprootKeyPath, &opts)
            .unwrap();
        let all_b = hash_for_signature(&tx_b, 1, &prevouts_b, HashType::ALL, SigVersion::TaprootKeyPath, &opts).unwrap();
        assert_ne!(all_a, all_b);
    }

    #[test]
    fn test_taproot_hash_is_tagged() {
        let tx = tx(1, 1);
        let prevouts = taproot_prevouts(1);
        let opts = TaprootSigHashOptions::default();
        let preimage =
            serialize_for_signature(&tx, 0, &prevouts, HashType::Default, SigVersion::TaprootKeyPath, &opts).unwrap();
        assert_eq!(preimage[0], TAPROOT_SIGHASH_EPOCH);
        let hash = hash_for_signature(&tx, 0, &prevouts, HashType::Default, SigVersion::TaprootKeyPath, &opts).unwrap();
        assert_eq!(hash, tagged_hash("TapSighash", &preimage));
    }

    #[test]
    fn test_options_from_witness() {
        let annex = vec![ANNEX_TAG, 0x01];
        let witness = Witness::new(vec![vec![0x01; 64], annex.clone()]);
        let options = TaprootSigHashOptions::from_witness(&witness);
        assert!(is_annex(&annex));
        assert_eq!(options.annex_hash, Some(annex_hash(&annex)));
        assert_eq!(options.tap_leaf_hash, None);
        assert_eq!(options.code_separator_position, u32::MAX);
    }

    #[test]
    fn test_sig_version_for_spend() {
        let empty = Witness::empty();
        assert_eq!(SigVersion::for_spend(&p2pkh_script(&[0; 20]), &[], &empty), SigVersion::Base);
        assert_eq!(SigVersion::for_spend(&p2wsh_script(&[OP_1]), &[], &empty), SigVersion::WitnessV0);
        let key_path = Witness::new(vec![vec![0x01; 64]]);
        assert_eq!(
            SigVersion::for_spend(&p2tr_script(&[1; 32]), &[], &key_path),
            SigVersion::TaprootKeyPath
        );
        let nested = push_data(&crate::script::p2wpkh_script(&[0x02; 33]));
        assert_eq!(
            SigVersion::for_spend(&crate::script::p2sh_script(&[0; 20]), &nested, &empty),
            SigVersion::WitnessV0
        );
    }
}
