//! Error types for block validation

use thiserror::Error;

/// Reasons a script evaluation aborts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Script too large: {0} bytes")]
    ScriptSize(usize),

    #[error("Push data truncated at offset {0}")]
    TruncatedPush(usize),

    #[error("Push element too large: {0} bytes")]
    PushSize(usize),

    #[error("Operation limit exceeded")]
    OpCount,

    #[error("Stack overflow")]
    StackSize,

    #[error("Stack underflow executing opcode 0x{0:02x}")]
    StackUnderflow(u8),

    #[error("Numeric operand exceeds {0} bytes")]
    NumberOverflow(usize),

    #[error("Disabled opcode 0x{0:02x}")]
    DisabledOpcode(u8),

    #[error("Bad opcode 0x{0:02x}")]
    BadOpcode(u8),

    #[error("Unbalanced conditional")]
    UnbalancedConditional,

    #[error("OP_RETURN executed")]
    OpReturn,

    #[error("Verify failed for opcode 0x{0:02x}")]
    VerifyFailed(u8),

    #[error("Invalid stack operation")]
    InvalidStackOperation,

    #[error("Public key count out of range: {0}")]
    PubkeyCount(i64),

    #[error("Signature count out of range: {0}")]
    SigCount(i64),

    #[error("Evaluation cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Contextually invalid: {0}")]
    ContextuallyInvalid(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Conflicting entry for {0}")]
    Conflict(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Script execution failed: {0}")]
    Script(#[from] ScriptError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
