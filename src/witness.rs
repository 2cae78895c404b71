//! Witness classification
//!
//! Every witness stack maps to exactly one [`ScriptWitness`] variant, and each
//! variant reproduces the stack it was built from.

use crate::constants::*;
use crate::taproot::{is_annex, ControlBlock};
use crate::types::{ByteString, Witness};
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

/// Classified witness stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptWitness {
    Empty,
    /// `[signature, pubkey]`, or `[pubkey]` before signing
    P2wpkh {
        signature: Option<ByteString>,
        pubkey: ByteString,
    },
    /// Arbitrary arguments followed by the witness script
    P2wsh {
        args: Vec<ByteString>,
        witness_script: ByteString,
    },
    TaprootKeyPath {
        signature: ByteString,
        annex: Option<ByteString>,
    },
    TaprootScriptPath {
        args: Vec<ByteString>,
        script: ByteString,
        control_block: ByteString,
        annex: Option<ByteString>,
    },
}

/// True for a compressed key or a valid uncompressed key
pub fn is_public_key(bytes: &[u8]) -> bool {
    match bytes.len() {
        33 => bytes[0] == 0x02 || bytes[0] == 0x03,
        65 => bytes[0] == 0x04 && PublicKey::from_slice(bytes).is_ok(),
        _ => false,
    }
}

fn is_schnorr_signature(bytes: &[u8]) -> bool {
    bytes.len() == 64 || bytes.len() == 65
}

impl ScriptWitness {
    /// Classify a stack (first element at the bottom)
    pub fn from_stack(stack: &[ByteString]) -> Self {
        // 1. Empty
        if stack.is_empty() {
            return ScriptWitness::Empty;
        }

        // 2. Taproot script path
        if let Some(script_path) = Self::script_path(stack) {
            return script_path;
        }

        // 3. P2WPKH
        let last = &stack[stack.len() - 1];
        if is_public_key(last) {
            match stack {
                [pubkey] => {
                    return ScriptWitness::P2wpkh {
                        signature: None,
                        pubkey: pubkey.clone(),
                    }
                }
                [signature, pubkey] => {
                    return ScriptWitness::P2wpkh {
                        signature: Some(signature.clone()),
                        pubkey: pubkey.clone(),
                    }
                }
                _ => {}
            }
        }

        // 4. Taproot key path
        match stack {
            [signature] if is_schnorr_signature(signature) => {
                return ScriptWitness::TaprootKeyPath {
                    signature: signature.clone(),
                    annex: None,
                }
            }
            [signature, annex] if is_schnorr_signature(signature) && is_annex(annex) => {
                return ScriptWitness::TaprootKeyPath {
                    signature: signature.clone(),
                    annex: Some(annex.clone()),
                }
            }
            _ => {}
        }

        // 5. Anything else
        let (witness_script, args) = stack.split_last().map(|(l, a)| (l.clone(), a.to_vec())).unwrap_or_default();
        ScriptWitness::P2wsh {
            args,
            witness_script,
        }
    }

    fn script_path(stack: &[ByteString]) -> Option<Self> {
        if stack.len() < 2 {
            return None;
        }
        let (annex, rest) = match stack.split_last() {
            Some((last, rest)) if is_annex(last) => (Some(last.clone()), rest),
            _ => (None, stack),
        };
        let (control_block, rest) = rest.split_last()?;
        let (script, args) = rest.split_last()?;
        let parsed = ControlBlock::parse(control_block).ok()?;
        if parsed.leaf_version != TAPROOT_LEAF_TAPSCRIPT {
            return None;
        }
        Some(ScriptWitness::TaprootScriptPath {
            args: args.to_vec(),
            script: script.clone(),
            control_block: control_block.clone(),
            annex,
        })
    }

    pub fn from_witness(witness: &Witness) -> Self {
        Self::from_stack(&witness.stack)
    }

    /// The stack this witness serializes to
    pub fn to_stack(&self) -> Vec<ByteString> {
        match self {
            ScriptWitness::Empty => Vec::new(),
            ScriptWitness::P2wpkh { signature, pubkey } => signature
                .iter()
                .cloned()
                .chain(std::iter::once(pubkey.clone()))
                .collect(),
            ScriptWitness::P2wsh {
                args,
                witness_script,
            } => {
                let mut stack = args.clone();
                stack.push(witness_script.clone());
                stack
            }
            ScriptWitness::TaprootKeyPath { signature, annex } => std::iter::once(signature.clone())
                .chain(annex.iter().cloned())
                .collect(),
            ScriptWitness::TaprootScriptPath {
                args,
                script,
                control_block,
                annex,
            } => {
                let mut stack = args.clone();
                stack.push(script.clone());
                stack.push(control_block.clone());
                stack.extend(annex.iter().cloned());
                stack
            }
        }
    }

    pub fn to_witness(&self) -> Witness {
        Witness::new(self.to_stack())
    }

    /// Annex carried by a taproot witness
    pub fn annex(&self) -> Option<&ByteString> {
        match self {
            ScriptWitness::TaprootKeyPath { annex, .. }
            | ScriptWitness::TaprootScriptPath { annex, .. } => annex.as_ref(),
            _ => None,
        }
    }
}

impl From<&Witness> for ScriptWitness {
    fn from(witness: &Witness) -> Self {
        ScriptWitness::from_witness(witness)
    }
}
