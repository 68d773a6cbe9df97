//! # Block Validation
//!
//! Block validation pipeline for a Bitcoin-style node: decode wire-format blocks,
//! check proof of work and the Merkle commitment, resolve every spent output and run
//! the scripts that authorize each spend.
//!
//! ## Architecture
//!
//! Components, leaf first:
//! - Hash registry (`hashing`)
//! - Wire codec (`wire`, `network`)
//! - Merkle tree (`merkle`)
//! - Script engine (`opcodes`, `script`)
//! - Signature checker (`sighash`)
//! - Block validator (`pow`, `transaction`, `store`, `height_index`, `block`)
//!
//! ## Design Principles
//!
//! 1. **Pure leaves**: hashing, decoding, Merkle and script evaluation are
//!    deterministic functions of their inputs
//! 2. **Injected state**: the chain store and height index are traits supplied by
//!    the caller
//! 3. **All-or-nothing**: a block is persisted only after every check passes
//! 4. **Exact Version Pinning**: consensus-critical dependencies are pinned
//!
//! ## Usage
//!
//! ```rust
//! use block_validation::Consensus;
//!
//! let consensus = Consensus::new();
//! // OP_1 OP_2 OP_ADD OP_3 OP_EQUAL
//! let valid = consensus.verify_script(&[], &[0x51, 0x52, 0x93, 0x53, 0x87]).unwrap();
//! assert!(valid);
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod hashing;
pub mod wire;
pub mod network;
pub mod merkle;
pub mod opcodes;
pub mod script;
pub mod sighash;
pub mod pow;
pub mod transaction;
pub mod store;
pub mod height_index;
pub mod config;
pub mod block;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{ConsensusError, Result, ScriptError};
pub use block::{BlockValidator, ValidationReport, ValidationStage};
pub use config::ValidatorConfig;
pub use hashing::{HashAlgorithm, HashRegistry};
pub use height_index::{HeightIndex, MemoryHeightIndex};
pub use store::{ChainItem, ChainStore, MemoryChainStore, ReadOnlyChainStore};

use hashing::{ExtensibleHashRegistry, HashFn};
use sighash::NoSignatureChecker;

/// Synchronous entry points to the pipeline's pure components
///
/// # Examples
///
/// ```
/// use block_validation::Consensus;
/// use block_validation::types::*;
///
/// let consensus = Consensus::new();
/// let tx = Transaction {
///     version: 1,
///     inputs: vec![TransactionInput {
///         prevout: OutPoint { hash: [1u8; 32], index: 0 },
///         script_sig: vec![0x51], // OP_1
///         sequence: 0xffffffff,
///     }],
///     outputs: vec![TransactionOutput {
///         value: 5000000000,
///         script_pubkey: vec![0x51], // OP_1
///     }],
///     lock_time: 0,
/// };
///
/// let bytes = consensus.serialize_transaction(&tx);
/// assert_eq!(consensus.decode_transaction(&bytes).unwrap(), tx);
/// assert!(consensus.check_transaction(&tx).is_ok());
/// ```
pub struct Consensus {
    registry: ExtensibleHashRegistry,
}

impl Consensus {
    /// Create a new instance with the built-in hash algorithms
    ///
    /// # Examples
    ///
    /// ```
    /// use block_validation::Consensus;
    ///
    /// let consensus = Consensus::new();
    /// ```
    pub fn new() -> Self {
        Self {
            registry: ExtensibleHashRegistry::new(),
        }
    }

    /// Hash `data` with the algorithm registered under `identifier`
    ///
    /// # Examples
    ///
    /// ```
    /// use block_validation::Consensus;
    ///
    /// let consensus = Consensus::new();
    /// let digest = consensus.hash("HASH256", b"").unwrap();
    /// assert_eq!(digest.len(), 32);
    /// assert!(consensus.hash("MD5", b"").is_err());
    /// ```
    pub fn hash(&self, identifier: &str, data: &[u8]) -> Result<Vec<u8>> {
        let hash_fn = self.registry.get(identifier)?;
        hash_fn(data)
    }

    /// Make an additional algorithm available to [`Consensus::hash`]
    pub fn register_hash(&mut self, identifier: &str, hash_fn: HashFn) -> Result<()> {
        self.registry.register(identifier, hash_fn)
    }

    /// Decode a complete `block` payload
    pub fn decode_block(&self, bytes: &[u8]) -> Result<Block> {
        wire::decode_block(bytes)
    }

    /// Decode a complete `tx` payload
    pub fn decode_transaction(&self, bytes: &[u8]) -> Result<Transaction> {
        wire::decode_transaction(bytes)
    }

    pub fn serialize_block(&self, block: &Block) -> Vec<u8> {
        wire::serialize_block(block)
    }

    pub fn serialize_transaction(&self, tx: &Transaction) -> Vec<u8> {
        wire::serialize_transaction(tx)
    }

    /// Context-free transaction rules
    pub fn check_transaction(&self, tx: &Transaction) -> Result<()> {
        transaction::check_transaction(tx)
    }

    /// Merkle root over transaction ids
    ///
    /// # Examples
    ///
    /// ```
    /// use block_validation::Consensus;
    ///
    /// let consensus = Consensus::new();
    /// let leaf = [7u8; 32];
    /// assert_eq!(consensus.merkle_root(&[leaf]).unwrap(), leaf);
    /// assert!(consensus.merkle_root(&[]).is_err());
    /// ```
    pub fn merkle_root(&self, txids: &[Hash]) -> Result<Hash> {
        merkle::merkle_root(txids)
    }

    /// Does `header` meet the target in its `bits` field?
    pub fn check_proof_of_work(&self, header: &BlockHeader) -> Result<bool> {
        pow::check_proof_of_work(header)
    }

    /// Run a spend without a transaction context; any signature check fails
    pub fn verify_script(&self, script_sig: &[u8], script_pubkey: &[u8]) -> Result<bool> {
        Ok(script::verify_script(script_sig, script_pubkey, &NoSignatureChecker, None)?)
    }

    /// Decode a peer message payload
    pub fn decode_payload(&self, command: &[u8; COMMAND_SIZE], payload: &[u8]) -> Result<network::NetworkPayload> {
        network::decode_payload(command, payload)
    }
}

impl Default for Consensus {
    fn default() -> Self {
        Self::new()
    }
}
