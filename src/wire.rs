//! Wire codec: little-endian framing of integers, byte vectors, transactions and blocks

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::types::*;

fn truncated(what: &str, pos: usize) -> ConsensusError {
    ConsensusError::MalformedData(format!("truncated {} at offset {}", what, pos))
}

/// Read cursor over a wire payload
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails unless every byte has been consumed
    pub fn finish(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ConsensusError::MalformedData(format!(
                "{} trailing bytes at offset {}",
                self.remaining(),
                self.pos
            )))
        }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(truncated(what, self.pos));
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..start + len])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.take(2, "u16")?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.take(4, "u32")?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let b = self.take(8, "u64")?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        Ok(self.read_u64_le()? as i64)
    }

    /// Compact-size integer; non-canonical encodings are rejected
    pub fn read_compact_size(&mut self) -> Result<u64> {
        let start = self.pos;
        let marker = self.read_u8()?;
        let (value, min) = match marker {
            0xfd => (self.read_u16_le()? as u64, 0xfd),
            0xfe => (self.read_u32_le()? as u64, 0x1_0000),
            0xff => (self.read_u64_le()?, 0x1_0000_0000),
            n => return Ok(n as u64),
        };
        if value < min {
            return Err(ConsensusError::MalformedData(format!(
                "non-canonical compact size {} at offset {}",
                value, start
            )));
        }
        Ok(value)
    }

    /// Compact-size count bounded by how many `min_item_size` items could still fit
    fn read_count(&mut self, min_item_size: usize, what: &str) -> Result<usize> {
        let count = self.read_compact_size()?;
        let max = (self.remaining() / min_item_size.max(1)) as u64;
        if count > max {
            return Err(ConsensusError::MalformedData(format!(
                "{} count {} exceeds remaining payload",
                what, count
            )));
        }
        Ok(count as usize)
    }

    pub fn read_digest256(&mut self) -> Result<Hash> {
        let b = self.take(32, "digest")?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(b);
        Ok(hash)
    }

    pub fn read_byte_vector(&mut self, len: usize) -> Result<ByteString> {
        Ok(self.take(len, "byte vector")?.to_vec())
    }

    /// Compact-size length prefixed byte vector
    pub fn read_var_bytes(&mut self) -> Result<ByteString> {
        let len = self.read_count(1, "byte vector")?;
        self.read_byte_vector(len)
    }

    pub fn read_outpoint(&mut self) -> Result<OutPoint> {
        Ok(OutPoint {
            hash: self.read_digest256()?,
            index: self.read_u32_le()?,
        })
    }

    pub fn read_input(&mut self) -> Result<TransactionInput> {
        Ok(TransactionInput {
            prevout: self.read_outpoint()?,
            script_sig: self.read_var_bytes()?,
            sequence: self.read_u32_le()?,
        })
    }

    pub fn read_output(&mut self) -> Result<TransactionOutput> {
        Ok(TransactionOutput {
            value: self.read_i64_le()?,
            script_pubkey: self.read_var_bytes()?,
        })
    }

    pub fn read_transaction(&mut self) -> Result<Transaction> {
        let version = self.read_u32_le()?;
        // outpoint + empty script + sequence
        let input_count = self.read_count(41, "input")?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(self.read_input()?);
        }
        // value + empty script
        let output_count = self.read_count(9, "output")?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(self.read_output()?);
        }
        let lock_time = self.read_u32_le()?;
        Ok(Transaction {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    pub fn read_block_header(&mut self) -> Result<BlockHeader> {
        Ok(BlockHeader {
            version: self.read_u32_le()?,
            prev_block_hash: self.read_digest256()?,
            merkle_root: self.read_digest256()?,
            timestamp: self.read_u32_le()?,
            bits: self.read_u32_le()?,
            nonce: self.read_u32_le()?,
        })
    }

    pub fn read_block(&mut self) -> Result<Block> {
        let header = self.read_block_header()?;
        let tx_count = self.read_count(MIN_TRANSACTION_SIZE, "transaction")?;
        let mut transactions = Vec::with_capacity(tx_count);
        for _ in 0..tx_count {
            transactions.push(self.read_transaction()?);
        }
        Ok(Block {
            header,
            transactions,
        })
    }
}

/// Decode a complete `block` payload
pub fn decode_block(bytes: &[u8]) -> Result<Block> {
    let mut reader = Reader::new(bytes);
    let block = reader.read_block()?;
    reader.finish()?;
    Ok(block)
}

/// Decode a complete `tx` payload
pub fn decode_transaction(bytes: &[u8]) -> Result<Transaction> {
    let mut reader = Reader::new(bytes);
    let tx = reader.read_transaction()?;
    reader.finish()?;
    Ok(tx)
}

/// Number of bytes the compact-size encoding of `n` occupies
pub fn compact_size_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

pub fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

pub fn write_transaction(out: &mut Vec<u8>, tx: &Transaction) {
    out.extend_from_slice(&tx.version.to_le_bytes());
    write_compact_size(out, tx.inputs.len() as u64);
    for input in &tx.inputs {
        out.extend_from_slice(&input.prevout.hash);
        out.extend_from_slice(&input.prevout.index.to_le_bytes());
        write_var_bytes(out, &input.script_sig);
        out.extend_from_slice(&input.sequence.to_le_bytes());
    }
    write_compact_size(out, tx.outputs.len() as u64);
    for output in &tx.outputs {
        out.extend_from_slice(&output.value.to_le_bytes());
        write_var_bytes(out, &output.script_pubkey);
    }
    out.extend_from_slice(&tx.lock_time.to_le_bytes());
}

pub fn serialize_transaction(tx: &Transaction) -> Vec<u8> {
    let mut out = Vec::new();
    write_transaction(&mut out, tx);
    out
}

pub fn serialize_header(header: &BlockHeader) -> [u8; BLOCK_HEADER_SIZE] {
    let mut out = [0u8; BLOCK_HEADER_SIZE];
    out[0..4].copy_from_slice(&header.version.to_le_bytes());
    out[4..36].copy_from_slice(&header.prev_block_hash);
    out[36..68].copy_from_slice(&header.merkle_root);
    out[68..72].copy_from_slice(&header.timestamp.to_le_bytes());
    out[72..76].copy_from_slice(&header.bits.to_le_bytes());
    out[76..80].copy_from_slice(&header.nonce.to_le_bytes());
    out
}

pub fn serialize_block(block: &Block) -> Vec<u8> {
    let mut out = serialize_header(&block.header).to_vec();
    write_compact_size(&mut out, block.transactions.len() as u64);
    for tx in &block.transactions {
        write_transaction(&mut out, tx);
    }
    out
}
