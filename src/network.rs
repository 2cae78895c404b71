//! Network selection and consensus parameters of each chain

use crate::constants::*;
use crate::error::{ChainError, Result};
use crate::pow::{compress_target, expand_target};
use crate::types::{BlockHeader, Hash};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Merkle root shared by every genesis block, internal byte order
const GENESIS_MERKLE_ROOT: Hash = [
    0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f, 0x61,
    0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a,
];

/// Compact target of the signet challenge network
const SIGNET_GENESIS_BITS: u32 = 0x1e0377ae;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
        }
    }

    pub fn chain_params(&self) -> ChainParams {
        ChainParams::for_network(*self)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(Network::Mainnet),
            "testnet" | "testnet3" | "test" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            other => Err(ChainError::Config(format!("unknown network: {other}"))),
        }
    }
}

/// Consensus parameters the header chain is validated against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub network: Network,
    pub genesis_header: BlockHeader,
    /// Easiest target a header may carry
    pub pow_limit: U256,
    pub difficulty_adjustment_interval: u32,
    pub target_spacing: u32,
    pub target_timespan: u32,
    /// Testnet rule: a header 20 minutes after its parent may use the limit
    pub allow_min_difficulty_blocks: bool,
    pub no_retargeting: bool,
}

impl ChainParams {
    pub fn for_network(network: Network) -> Self {
        let (timestamp, bits, nonce) = match network {
            Network::Mainnet => (1231006505, 0x1d00ffff, 2083236893),
            Network::Testnet => (1296688602, 0x1d00ffff, 414098458),
            Network::Signet => (1598918400, SIGNET_GENESIS_BITS, 52613770),
            Network::Regtest => (1296688602, 0x207fffff, 2),
        };
        let pow_limit = match network {
            Network::Mainnet | Network::Testnet => U256::MAX >> 32,
            Network::Signet => expand_target(SIGNET_GENESIS_BITS).target,
            Network::Regtest => U256::MAX >> 1,
        };
        Self {
            network,
            genesis_header: BlockHeader {
                version: 1,
                prev_block_hash: [0u8; 32],
                merkle_root: GENESIS_MERKLE_ROOT,
                timestamp,
                bits,
                nonce,
            },
            pow_limit,
            difficulty_adjustment_interval: DIFFICULTY_ADJUSTMENT_INTERVAL,
            target_spacing: TARGET_TIME_PER_BLOCK,
            target_timespan: TARGET_TIMESPAN,
            allow_min_difficulty_blocks: matches!(network, Network::Testnet | Network::Regtest),
            no_retargeting: network == Network::Regtest,
        }
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis_header.hash()
    }

    /// The proof-of-work limit in compact form
    pub fn pow_limit_bits(&self) -> u32 {
        compress_target(self.pow_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::to_hex_be;

    #[test]
    fn test_genesis_hashes() {
        let cases = [
            (Network::Mainnet, "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"),
            (Network::Testnet, "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943"),
            (Network::Signet, "00000008819873e925422c1ff0f99f7cc9bbb232af63a077a480a3633bee1ef6"),
            (Network::Regtest, "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"),
        ];
        for (network, expected) in cases {
            assert_eq!(to_hex_be(&network.chain_params().genesis_hash()), expected, "{network}");
        }
    }

    #[test]
    fn test_pow_limit_bits() {
        assert_eq!(Network::Mainnet.chain_params().pow_limit_bits(), 0x1d00ffff);
        assert_eq!(Network::Regtest.chain_params().pow_limit_bits(), 0x207fffff);
        assert_eq!(Network::Signet.chain_params().pow_limit_bits(), SIGNET_GENESIS_BITS);
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("regtest".parse::<Network>().unwrap(), Network::Regtest);
        assert_eq!("Testnet3".parse::<Network>().unwrap(), Network::Testnet);
        assert!("litecoin".parse::<Network>().is_err());
        assert_eq!(serde_json::to_string(&Network::Signet).unwrap(), "\"signet\"");
    }

    #[test]
    fn test_retarget_flags() {
        let regtest = Network::Regtest.chain_params();
        assert!(regtest.allow_min_difficulty_blocks && regtest.no_retargeting);
        let mainnet = Network::Mainnet.chain_params();
        assert!(!mainnet.allow_min_difficulty_blocks && !mainnet.no_retargeting);
    }
}
