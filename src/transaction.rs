//! Context-free transaction checks
//!
//! These rules need no chain state and run before any input is resolved.

use crate::error::{ConsensusError, Result};
use crate::types::*;
use std::collections::HashSet;

fn invalid(msg: String) -> ConsensusError {
    ConsensusError::ContextuallyInvalid(msg)
}

/// CheckTransaction
///
/// 1. At least one input and one output
/// 2. Every output value is non-negative and their sum does not overflow
/// 3. No outpoint is spent twice
/// 4. Only a coinbase may reference the null outpoint
pub fn check_transaction(tx: &Transaction) -> Result<()> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(invalid(format!(
            "transaction {} has empty inputs or outputs",
            display_hash(&tx.id())
        )));
    }

    for (i, output) in tx.outputs.iter().enumerate() {
        if output.value < 0 {
            return Err(invalid(format!("negative output value {} at index {}", output.value, i)));
        }
    }
    if tx.total_output_value().is_none() {
        return Err(invalid("output values overflow".to_string()));
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return Err(invalid(format!("outpoint {} spent twice by one transaction", input.prevout)));
        }
    }

    if !tx.is_coinbase() && tx.inputs.iter().any(TransactionInput::is_coinbase) {
        return Err(invalid("null outpoint in a non-coinbase transaction".to_string()));
    }

    Ok(())
}
