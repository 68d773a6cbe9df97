//! Block height index
//!
//! Maps accepted block ids to their height. The validator reads the previous
//! block's height from here and records each accepted block.

use crate::error::{ConsensusError, Result};
use crate::types::*;
use parking_lot::RwLock;
use std::collections::HashMap;

pub trait HeightIndex: Send + Sync {
    fn height_of(&self, id: &Hash) -> Option<u64>;

    /// Record `id` at `height`. Re-recording the same height is a no-op.
    fn record(&self, id: Hash, height: u64) -> Result<()>;

    /// Highest recorded height and the block at it
    fn tip(&self) -> Option<(Hash, u64)>;
}

#[derive(Debug, Default)]
struct Heights {
    by_id: HashMap<Hash, u64>,
    tip: Option<(Hash, u64)>,
}

/// In-memory height index
#[derive(Debug, Default)]
pub struct MemoryHeightIndex {
    inner: RwLock<Heights>,
}

impl MemoryHeightIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}

impl HeightIndex for MemoryHeightIndex {
    fn height_of(&self, id: &Hash) -> Option<u64> {
        self.inner.read().by_id.get(id).copied()
    }

    fn record(&self, id: Hash, height: u64) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_id.get(&id) {
            if *existing == height {
                return Ok(());
            }
            return Err(ConsensusError::Conflict(format!(
                "block {} already recorded at height {}",
                display_hash(&id),
                existing
            )));
        }
        inner.by_id.insert(id, height);
        // first block seen at a new maximum height becomes the tip
        if inner.tip.map_or(true, |(_, tip)| height > tip) {
            inner.tip = Some((id, height));
        }
        Ok(())
    }

    fn tip(&self) -> Option<(Hash, u64)> {
        self.inner.read().tip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_lookup() {
        let index = MemoryHeightIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.tip(), None);

        index.record([1u8; 32], 0).unwrap();
        index.record([2u8; 32], 1).unwrap();
        assert_eq!(index.height_of(&[2u8; 32]), Some(1));
        assert_eq!(index.height_of(&[3u8; 32]), None);
        assert_eq!(index.tip(), Some(([2u8; 32], 1)));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_rerecord_same_height_is_noop() {
        let index = MemoryHeightIndex::new();
        index.record([1u8; 32], 4).unwrap();
        index.record([1u8; 32], 4).unwrap();
        assert!(matches!(index.record([1u8; 32], 5), Err(ConsensusError::Conflict(_))));
    }

    #[test]
    fn test_side_branch_does_not_move_tip() {
        let index = MemoryHeightIndex::new();
        index.record([1u8; 32], 0).unwrap();
        index.record([2u8; 32], 1).unwrap();
        index.record([3u8; 32], 1).unwrap();
        assert_eq!(index.tip(), Some(([2u8; 32], 1)));
    }
}
