//! Error types for signature hashing and chain verification

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Duplicate block headers: {0}")]
    DuplicateHeaders(String),

    #[error("Invalid block header: {0}")]
    InvalidBlockHeader(String),

    #[error("Unknown block hash: {0}")]
    UnknownBlockHash(String),

    #[error("Unknown filter hash: {0}")]
    UnknownFilterHash(String),

    #[error("Duplicate filters: {0}")]
    DuplicateFilters(String),

    /// Broken filter-header link, wrong previous height or checkpoint mismatch.
    #[error("Invalid filter header: {0}")]
    InvalidFilterHeader(String),

    #[error("Input index {index} out of range ({inputs} inputs)")]
    InvalidInputIndex { index: usize, inputs: usize },

    #[error("Incompatible lock times: {0}")]
    IncompatibleLockTimes(String),

    #[error("Invalid hash type: {0:#x}")]
    InvalidHashType(u32),

    #[error("Expected {expected} funding outputs, got {found}")]
    PrevoutCountMismatch { expected: usize, found: usize },

    #[error("Invalid script: {0}")]
    InvalidScript(String),

    #[error("Invalid proof of work: {0}")]
    InvalidProofOfWork(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Chain state error: {0}")]
    ChainState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ChainError>;
