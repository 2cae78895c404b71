//! # Chain handler configuration
//!
//! Loaded from JSON; every field falls back to its default when absent.

use crate::constants::{DIFFICULTY_ADJUSTMENT_INTERVAL, MEDIAN_TIME_SPAN};
use crate::error::{ChainError, Result};
use crate::network::{ChainParams, Network};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Chain handler configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub network: Network,

    /// Headers re-weighed per store round trip by chain-work recalculation.
    pub chain_work_batch_size: u32,

    /// Filter headers requested per `getcfheaders`.
    pub filter_header_batch_size: u32,

    /// Filters requested per `getcfilters`.
    pub filter_batch_size: u32,

    /// Headers kept in memory per candidate chain. Must cover a retarget
    /// window so the expected bits can be derived.
    pub chain_cache_depth: usize,

    pub log_level: String,

    /// Emit JSON log lines instead of the plain format.
    pub log_json: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            chain_work_batch_size: 2016,
            filter_header_batch_size: 2000,
            filter_batch_size: 1000,
            chain_cache_depth: 2 * DIFFICULTY_ADJUSTMENT_INTERVAL as usize,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl ChainConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Regtest with small batches.
    pub fn for_testing() -> Self {
        Self {
            network: Network::Regtest,
            chain_work_batch_size: 10,
            filter_header_batch_size: 20,
            filter_batch_size: 10,
            chain_cache_depth: DIFFICULTY_ADJUSTMENT_INTERVAL as usize,
            log_level: "debug".to_string(),
            log_json: false,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ChainError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ChainError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain_work_batch_size == 0 {
            return Err(ChainError::Config("chain_work_batch_size must be positive".into()));
        }
        if self.filter_header_batch_size == 0 || self.filter_batch_size == 0 {
            return Err(ChainError::Config("filter batch sizes must be positive".into()));
        }
        let min_depth = (DIFFICULTY_ADJUSTMENT_INTERVAL as usize).max(MEDIAN_TIME_SPAN);
        if self.chain_cache_depth < min_depth {
            return Err(ChainError::Config(format!(
                "chain_cache_depth {} below minimum {min_depth}",
                self.chain_cache_depth
            )));
        }
        Ok(())
    }

    pub fn chain_params(&self) -> ChainParams {
        self.network.chain_params()
    }
}
