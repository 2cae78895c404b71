//! Script tokenization and classification
//!
//! Only what signature hashing needs: walking opcodes and push data,
//! removing `OP_CODESEPARATOR`, recognising standard output templates and
//! decoding script numbers. No opcode is ever executed here.

use crate::constants::*;
use crate::crypto::{hash160, sha256};
use crate::error::{ChainError, Result};
use crate::types::ByteString;
use serde::{Deserialize, Serialize};

/// One parsed script element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptToken {
    /// Non-push opcode (also OP_0, OP_1NEGATE and OP_1..OP_16)
    Op(u8),
    /// Data push with the opcode that introduced it
    Push { opcode: u8, data: ByteString },
}

impl ScriptToken {
    pub fn opcode(&self) -> u8 {
        match self {
            ScriptToken::Op(op) => *op,
            ScriptToken::Push { opcode, .. } => *opcode,
        }
    }

    /// Pushed bytes, if this token is a data push
    pub fn push_data(&self) -> Option<&[u8]> {
        match self {
            ScriptToken::Push { data, .. } => Some(data),
            ScriptToken::Op(_) => None,
        }
    }

    /// Serialize back into script bytes
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            ScriptToken::Op(op) => out.push(*op),
            ScriptToken::Push { opcode, data } => {
                out.push(*opcode);
                match *opcode {
                    OP_PUSHDATA1 => out.push(data.len() as u8),
                    OP_PUSHDATA2 => out.extend_from_slice(&(data.len() as u16).to_le_bytes()),
                    OP_PUSHDATA4 => out.extend_from_slice(&(data.len() as u32).to_le_bytes()),
                    _ => {}
                }
                out.extend_from_slice(data);
            }
        }
    }
}

/// Decode the opcode at `pos`.
///
/// Returns the opcode, the push-data range (if any) and the position of the
/// next opcode, or `None` at the end of the script or on a truncated push.
pub fn next_op(script: &[u8], pos: usize) -> Option<(u8, Option<(usize, usize)>, usize)> {
    let opcode = *script.get(pos)?;
    let mut cursor = pos + 1;
    let len = match opcode {
        0x01..=0x4b => opcode as usize,
        OP_PUSHDATA1 => {
            let len = *script.get(cursor)? as usize;
            cursor += 1;
            len
        }
        OP_PUSHDATA2 => {
            let bytes = script.get(cursor..cursor + 2)?;
            cursor += 2;
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        }
        OP_PUSHDATA4 => {
            let bytes = script.get(cursor..cursor + 4)?;
            cursor += 4;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        }
        _ => return Some((opcode, None, cursor)),
    };
    let end = cursor.checked_add(len)?;
    if end > script.len() {
        return None;
    }
    Some((opcode, Some((cursor, end)), end))
}

/// Parse a script into tokens, failing on a truncated push
pub fn parse_script(script: &[u8]) -> Result<Vec<ScriptToken>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < script.len() {
        let (opcode, push, next) = next_op(script, pos).ok_or_else(|| {
            ChainError::InvalidScript(format!("truncated push at offset {pos}"))
        })?;
        tokens.push(match push {
            Some((start, end)) => ScriptToken::Push {
                opcode,
                data: script[start..end].to_vec(),
            },
            None => ScriptToken::Op(opcode),
        });
        pos = next;
    }
    Ok(tokens)
}

/// Serialize tokens back into script bytes
pub fn serialize_tokens(tokens: &[ScriptToken]) -> ByteString {
    let mut out = Vec::new();
    for token in tokens {
        token.write_to(&mut out);
    }
    out
}

/// Strip every `OP_CODESEPARATOR`, leaving push data untouched.
///
/// Bytes after a truncated push are copied verbatim, which is how the
/// legacy signature serializer treats malformed scripts.
pub fn remove_code_separators(script: &[u8]) -> ByteString {
    let mut out = Vec::with_capacity(script.len());
    let mut segment_start = 0;
    let mut pos = 0;
    while let Some((opcode, _, next)) = next_op(script, pos) {
        if opcode == OP_CODESEPARATOR {
            out.extend_from_slice(&script[segment_start..pos]);
            segment_start = next;
        }
        pos = next;
    }
    out.extend_from_slice(&script[segment_start..]);
    out
}

/// Last data push of a script, e.g. the redeem script of a P2SH script_sig
pub fn last_push(script: &[u8]) -> Option<ByteString> {
    let mut pos = 0;
    let mut last = None;
    while let Some((_, push, next)) = next_op(script, pos) {
        last = push.map(|(start, end)| script[start..end].to_vec());
        pos = next;
    }
    last
}

/// Build the minimal push of `data`
pub fn push_data(data: &[u8]) -> ByteString {
    let opcode = match data.len() {
        0..=0x4b => data.len() as u8,
        0x4c..=0xff => OP_PUSHDATA1,
        0x100..=0xffff => OP_PUSHDATA2,
        _ => OP_PUSHDATA4,
    };
    let mut out = Vec::with_capacity(data.len() + 5);
    ScriptToken::Push {
        opcode,
        data: data.to_vec(),
    }
    .write_to(&mut out);
    out
}

/// Decode a script number (little-endian sign-magnitude, at most `max_len` bytes)
pub fn decode_script_num(bytes: &[u8], max_len: usize) -> Result<i64> {
    if bytes.len() > max_len {
        return Err(ChainError::InvalidScript(format!(
            "script number of {} bytes exceeds {max_len}",
            bytes.len()
        )));
    }
    if bytes.is_empty() {
        return Ok(0);
    }
    let mut value: i64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        value |= (*byte as i64) << (8 * i);
    }
    let last = bytes[bytes.len() - 1];
    if last & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        return Ok(-(value & mask));
    }
    Ok(value)
}

/// Numeric value pushed by a token, for small-integer opcodes and data pushes
pub fn token_number(token: &ScriptToken, max_len: usize) -> Option<i64> {
    match token {
        ScriptToken::Op(OP_0) => Some(0),
        ScriptToken::Op(OP_1NEGATE) => Some(-1),
        ScriptToken::Op(op) if (OP_1..=OP_16).contains(op) => Some((*op - OP_1 + 1) as i64),
        ScriptToken::Push { data, .. } => decode_script_num(data, max_len).ok(),
        ScriptToken::Op(_) => None,
    }
}

/// Standard output templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptType {
    P2pk,
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
    WitnessUnknown,
    Multisig,
    NullData,
    NonStandard,
}

/// Witness version and program of a segwit output script
pub fn witness_program(script: &[u8]) -> Option<(u8, &[u8])> {
    if script.len() < 4 || script.len() > 42 {
        return None;
    }
    let version = match script[0] {
        OP_0 => 0,
        op @ OP_1..=OP_16 => op - OP_1 + 1,
        _ => return None,
    };
    let push_len = script[1] as usize;
    if !(2..=40).contains(&push_len) || push_len + 2 != script.len() {
        return None;
    }
    Some((version, &script[2..]))
}

/// Classify an output script by its template
pub fn classify_script(script: &[u8]) -> ScriptType {
    if let Some((version, program)) = witness_program(script) {
        return match (version, program.len()) {
            (0, 20) => ScriptType::P2wpkh,
            (0, 32) => ScriptType::P2wsh,
            (1, 32) => ScriptType::P2tr,
            (0, _) => ScriptType::NonStandard,
            _ => ScriptType::WitnessUnknown,
        };
    }
    if is_p2pkh(script) {
        return ScriptType::P2pkh;
    }
    if is_p2sh(script) {
        return ScriptType::P2sh;
    }
    if script.first() == Some(&OP_RETURN) {
        return ScriptType::NullData;
    }
    let tokens = match parse_script(script) {
        Ok(tokens) => tokens,
        Err(_) => return ScriptType::NonStandard,
    };
    match tokens.as_slice() {
        [ScriptToken::Push { data, .. }, ScriptToken::Op(OP_CHECKSIG)]
            if data.len() == 33 || data.len() == 65 =>
        {
            ScriptType::P2pk
        }
        [first, keys @ .., last, ScriptToken::Op(OP_CHECKMULTISIG)] if is_multisig(first, keys, last) => {
            ScriptType::Multisig
        }
        _ => ScriptType::NonStandard,
    }
}

fn is_multisig(first: &ScriptToken, keys: &[ScriptToken], last: &ScriptToken) -> bool {
    let (Some(required), Some(total)) = (token_number(first, 1), token_number(last, 1)) else {
        return false;
    };
    let all_keys = keys
        .iter()
        .all(|k| matches!(k.push_data(), Some(d) if d.len() == 33 || d.len() == 65));
    all_keys && total as usize == keys.len() && required >= 1 && required <= total
}

pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG
pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> ByteString {
    let mut script = vec![OP_DUP, OP_HASH160, 0x14];
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

/// OP_HASH160 <hash> OP_EQUAL
pub fn p2sh_script(script_hash: &[u8; 20]) -> ByteString {
    let mut script = vec![OP_HASH160, 0x14];
    script.extend_from_slice(script_hash);
    script.push(OP_EQUAL);
    script
}

/// OP_0 <20-byte key hash>
pub fn p2wpkh_script(pubkey: &[u8]) -> ByteString {
    let mut script = vec![OP_0, 0x14];
    script.extend_from_slice(&hash160(pubkey));
    script
}

/// OP_0 <32-byte script hash>
pub fn p2wsh_script(witness_script: &[u8]) -> ByteString {
    let mut script = vec![OP_0, 0x20];
    script.extend_from_slice(&sha256(witness_script));
    script
}

/// OP_1 <32-byte output key>
pub fn p2tr_script(output_key: &[u8; 32]) -> ByteString {
    let mut script = vec![OP_1, 0x20];
    script.extend_from_slice(output_key);
    script
}
