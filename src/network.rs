//! Network message payloads handed to the validator
//!
//! Framing, magic and checksums are handled by the peer layer; this module only
//! maps a 12-byte command name and its payload to a typed value.

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::types::*;
use crate::wire::{self, Reader};

/// Decoded payload of a `block`, `tx`, `inv` or `getdata` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkPayload {
    Block(Block),
    Tx(Transaction),
    Inv(InvMessage),
    GetData(InvMessage),
}

impl NetworkPayload {
    pub fn command(&self) -> &'static str {
        match self {
            NetworkPayload::Block(_) => "block",
            NetworkPayload::Tx(_) => "tx",
            NetworkPayload::Inv(_) => "inv",
            NetworkPayload::GetData(_) => "getdata",
        }
    }
}

/// Inventory listing as carried by `inv` and `getdata`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvMessage {
    pub inventory: Vec<InventoryVector>,
}

/// Inventory vector identifying objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InventoryVector {
    pub inv_type: u32,
    pub hash: Hash,
}

impl InventoryVector {
    pub fn block(hash: Hash) -> Self {
        Self { inv_type: INV_BLOCK, hash }
    }

    pub fn tx(hash: Hash) -> Self {
        Self { inv_type: INV_TX, hash }
    }

    pub fn is_block(&self) -> bool {
        self.inv_type == INV_BLOCK
    }

    pub fn is_tx(&self) -> bool {
        self.inv_type == INV_TX
    }
}

/// Command name from its NUL-padded 12-byte field
pub fn command_name(command: &[u8; COMMAND_SIZE]) -> Result<&str> {
    let end = command.iter().position(|b| *b == 0).unwrap_or(COMMAND_SIZE);
    if command[end..].iter().any(|b| *b != 0) {
        return Err(ConsensusError::MalformedData(
            "command has bytes after NUL padding".to_string(),
        ));
    }
    let name = &command[..end];
    if !name.iter().all(|b| b.is_ascii_graphic()) {
        return Err(ConsensusError::MalformedData(
            "command is not printable ASCII".to_string(),
        ));
    }
    std::str::from_utf8(name).map_err(|e| ConsensusError::MalformedData(e.to_string()))
}

/// NUL-padded 12-byte field for `name`
pub fn encode_command(name: &str) -> Result<[u8; COMMAND_SIZE]> {
    if name.len() > COMMAND_SIZE || !name.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(ConsensusError::InvalidArgument(format!("invalid command name {:?}", name)));
    }
    let mut command = [0u8; COMMAND_SIZE];
    command[..name.len()].copy_from_slice(name.as_bytes());
    Ok(command)
}

/// Decode the payload of message `command`; unknown commands are `Unsupported`
pub fn decode_payload(command: &[u8; COMMAND_SIZE], payload: &[u8]) -> Result<NetworkPayload> {
    match command_name(command)? {
        "block" => Ok(NetworkPayload::Block(wire::decode_block(payload)?)),
        "tx" => Ok(NetworkPayload::Tx(wire::decode_transaction(payload)?)),
        "inv" => Ok(NetworkPayload::Inv(decode_inv(payload)?)),
        "getdata" => Ok(NetworkPayload::GetData(decode_inv(payload)?)),
        other => Err(ConsensusError::Unsupported(format!("message command {}", other))),
    }
}

fn decode_inv(payload: &[u8]) -> Result<InvMessage> {
    let mut reader = Reader::new(payload);
    let count = reader.read_compact_size()?;
    if count > MAX_INV_ENTRIES as u64 {
        return Err(ConsensusError::MalformedData(format!(
            "inventory of {} entries exceeds {}",
            count, MAX_INV_ENTRIES
        )));
    }
    // each entry is a 4-byte type and a 32-byte hash
    if count > (reader.remaining() / 36) as u64 {
        return Err(ConsensusError::MalformedData(format!(
            "inventory count {} exceeds payload",
            count
        )));
    }
    let mut inventory = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let inv_type = reader.read_u32_le()?;
        let hash = reader.read_digest256()?;
        inventory.push(InventoryVector { inv_type, hash });
    }
    reader.finish()?;
    Ok(InvMessage { inventory })
}

/// Serialize an inventory listing
pub fn encode_inv(message: &InvMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + message.inventory.len() * 36);
    wire::write_compact_size(&mut out, message.inventory.len() as u64);
    for entry in &message.inventory {
        out.extend_from_slice(&entry.inv_type.to_le_bytes());
        out.extend_from_slice(&entry.hash);
    }
    out
}
