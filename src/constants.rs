//! Consensus constants of the network

/// Maximum serialized block size accepted off the wire
pub const MAX_BLOCK_SIZE: usize = 4_000_000;

/// Maximum script length
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum size of a single pushed stack element
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Maximum combined size of the main and alternate stacks during script execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of non-push operations in a script
pub const MAX_SCRIPT_OPS: usize = 201;

/// Maximum number of public keys in one CHECKMULTISIG
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Byte width of numeric script operands
pub const MAX_SCRIPT_NUM_SIZE: usize = 4;

/// Serialized block header length
pub const BLOCK_HEADER_SIZE: usize = 80;

/// Smallest possible serialized transaction (version, two empty counts, lock time)
pub const MIN_TRANSACTION_SIZE: usize = 10;

/// Easiest target the network accepts (regtest difficulty)
pub const MAX_TARGET_BITS: u32 = 0x207fffff;

/// Mainnet genesis difficulty
pub const GENESIS_BITS: u32 = 0x1d00ffff;

/// Sequence number for final inputs
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Output index carried by coinbase inputs
pub const COINBASE_OUTPUT_INDEX: u32 = 0xffffffff;

/// Sighash flags
pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Length of a network command tag
pub const COMMAND_SIZE: usize = 12;

/// Inventory vector object types
pub const INV_ERROR: u32 = 0;
pub const INV_TX: u32 = 1;
pub const INV_BLOCK: u32 = 2;

/// Maximum number of entries in one inv message
pub const MAX_INV_ENTRIES: usize = 50_000;
