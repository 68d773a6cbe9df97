//! Core chain types for block validation

use crate::hashing::sha256d;
use crate::wire::{serialize_header, serialize_transaction};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash type: 256-bit digest, little-endian as an integer
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Render a digest the way the network displays it (byte-reversed hex)
pub fn display_hash(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Reference to an output of an earlier transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    /// Coinbase inputs reference the all-zero transaction id
    pub fn is_null(&self) -> bool {
        self.hash == [0u8; 32]
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", display_hash(&self.hash), self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
}

impl TransactionInput {
    pub fn is_coinbase(&self) -> bool {
        self.prevout.is_null()
    }
}

/// Value source: an amount locked by a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: i64,
    pub script_pubkey: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Double-SHA256 of the serialized transaction
    pub fn id(&self) -> Hash {
        sha256d(&serialize_transaction(self))
    }

    /// A coinbase carries exactly one input spending the null outpoint
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Sum of output values, `None` on overflow
    pub fn total_output_value(&self) -> Option<i64> {
        self.outputs
            .iter()
            .try_fold(0i64, |acc, o| acc.checked_add(o.value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Double-SHA256 of the 80 header bytes
    pub fn id(&self) -> Hash {
        sha256d(&serialize_header(self))
    }

    /// The genesis block has no predecessor
    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash == [0u8; 32]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn id(&self) -> Hash {
        self.header.id()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }
}

/// Outcome of validating a block or transaction message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockValidationResult {
    /// Validated and persisted
    Okay,
    /// The payload could not be decoded
    MessageInvalid(String),
    /// Well-formed but violates a consensus rule
    ContextuallyInvalid(String),
    /// Validation was cancelled before a verdict
    Cancelled,
}

impl BlockValidationResult {
    pub fn is_okay(&self) -> bool {
        matches!(self, BlockValidationResult::Okay)
    }
}
