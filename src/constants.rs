//! Bitcoin consensus constants used by the sighash engine and chain handler

/// Maximum money supply: 21,000,000 BTC in satoshis
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// Serialized block header size
pub const BLOCK_HEADER_SIZE: usize = 80;

/// Difficulty adjustment interval: 2016 blocks
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u32 = 2016;

/// Target time per block: 10 minutes
pub const TARGET_TIME_PER_BLOCK: u32 = 600;

/// Target timespan of one retarget window: two weeks
pub const TARGET_TIMESPAN: u32 = DIFFICULTY_ADJUSTMENT_INTERVAL * TARGET_TIME_PER_BLOCK;

/// Number of past headers feeding the median time past
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Lock time threshold: transactions with lock time < this are block height
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Witness scale factor used for weight computation
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Maximum headers carried by one `headers` message
pub const MAX_HEADERS_PER_MESSAGE: usize = 2000;

/// Interval between BIP157 filter-header checkpoints
pub const FILTER_CHECKPOINT_INTERVAL: u32 = 1000;

// Sighash type codes

pub const SIGHASH_DEFAULT: u32 = 0x00;
pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Mask selecting the base type of a legacy / segwit v0 hash type
pub const SIGHASH_BASE_MASK: u32 = 0x1f;

// Opcodes referenced outside the script tokenizer

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CODESEPARATOR: u8 = 0xab;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;

// Taproot

/// First byte of a taproot annex
pub const ANNEX_TAG: u8 = 0x50;

/// Leaf version of BIP342 tapscript
pub const TAPROOT_LEAF_TAPSCRIPT: u8 = 0xc0;

/// Mask selecting the leaf version from a control block's first byte
pub const TAPROOT_LEAF_MASK: u8 = 0xfe;

/// Size of the control block without any merkle path node
pub const TAPROOT_CONTROL_BASE_SIZE: usize = 33;

/// Size of one merkle path node in a control block
pub const TAPROOT_CONTROL_NODE_SIZE: usize = 32;

/// Maximum depth of a taproot script tree
pub const TAPROOT_CONTROL_MAX_NODE_COUNT: usize = 128;
