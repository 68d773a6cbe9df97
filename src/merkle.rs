//! Merkle tree over transaction ids
//!
//! Nodes live in one arena vector and refer to their children by index, so the
//! tree is acyclic by construction. Leaves come first, in input order, followed
//! by each higher level; the root is the last node.

use crate::error::{ConsensusError, Result};
use crate::hashing::sha256d;
use crate::types::Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNode {
    pub data: Hash,
    pub left: Option<usize>,
    pub right: Option<usize>,
}

impl MerkleNode {
    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    nodes: Vec<MerkleNode>,
    leaf_count: usize,
    depth: usize,
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

impl MerkleTree {
    /// Build the tree over `leaves` in order. An odd node at any level is paired
    /// with itself.
    pub fn build(leaves: &[Hash]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(ConsensusError::InvalidArgument(
                "merkle tree requires at least one leaf".to_string(),
            ));
        }

        let mut nodes: Vec<MerkleNode> = leaves
            .iter()
            .map(|leaf| MerkleNode {
                data: *leaf,
                left: None,
                right: None,
            })
            .collect();

        // Shape pass: link parents to children by index
        let mut level: Vec<usize> = (0..nodes.len()).collect();
        let mut depth = 0;
        while level.len() > 1 {
            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            for pair in level.chunks(2) {
                let left = pair[0];
                let right = *pair.get(1).unwrap_or(&left);
                nodes.push(MerkleNode {
                    data: [0u8; 32],
                    left: Some(left),
                    right: Some(right),
                });
                next.push(nodes.len() - 1);
            }
            level = next;
            depth += 1;
        }

        // Hash pass: children always precede their parent in the arena
        for idx in leaves.len()..nodes.len() {
            if let (Some(l), Some(r)) = (nodes[idx].left, nodes[idx].right) {
                nodes[idx].data = hash_pair(&nodes[l].data, &nodes[r].data);
            }
        }

        Ok(Self {
            nodes,
            leaf_count: leaves.len(),
            depth,
        })
    }

    pub fn root(&self) -> Hash {
        // build() guarantees at least one node
        self.nodes[self.nodes.len() - 1].data
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Number of levels above the leaves
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, idx: usize) -> Option<&MerkleNode> {
        self.nodes.get(idx)
    }

    /// Sibling digests from leaf `index` up to the root
    pub fn branch(&self, index: usize) -> Result<Vec<Hash>> {
        if index >= self.leaf_count {
            return Err(ConsensusError::InvalidArgument(format!(
                "leaf index {} out of range for {} leaves",
                index, self.leaf_count
            )));
        }
        let mut branch = Vec::with_capacity(self.depth);
        let mut level_start = 0;
        let mut level_len = self.leaf_count;
        let mut pos = index;
        while level_len > 1 {
            let sibling = if pos % 2 == 0 {
                (pos + 1).min(level_len - 1)
            } else {
                pos - 1
            };
            branch.push(self.nodes[level_start + sibling].data);
            level_start += level_len;
            level_len = (level_len + 1) / 2;
            pos /= 2;
        }
        Ok(branch)
    }
}

/// Root over `leaves` without keeping the tree
pub fn merkle_root(leaves: &[Hash]) -> Result<Hash> {
    Ok(MerkleTree::build(leaves)?.root())
}

/// Recompute the root from a leaf and its branch
pub fn verify_branch(leaf: &Hash, branch: &[Hash], index: usize, root: &Hash) -> bool {
    let mut acc = *leaf;
    let mut pos = index;
    for sibling in branch {
        acc = if pos % 2 == 0 {
            hash_pair(&acc, sibling)
        } else {
            hash_pair(sibling, &acc)
        };
        pos /= 2;
    }
    &acc == root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Hash {
        [n; 32]
    }

    #[test]
    fn test_empty_leaves_rejected() {
        assert!(matches!(MerkleTree::build(&[]), Err(ConsensusError::InvalidArgument(_))));
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let tree = MerkleTree::build(&[leaf(7)]).unwrap();
        assert_eq!(tree.root(), leaf(7));
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_two_leaves() {
        let tree = MerkleTree::build(&[leaf(1), leaf(2)]).unwrap();
        assert_eq!(tree.root(), hash_pair(&leaf(1), &leaf(2)));
        let root = tree.node(2).unwrap();
        assert_eq!(root.left, Some(0));
        assert_eq!(root.right, Some(1));
        assert!(tree.node(0).unwrap().is_leaf());
    }

    #[test]
    fn test_odd_leaf_duplicated() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let tree = MerkleTree::build(&[a, b, c]).unwrap();
        let expected = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));
        assert_eq!(tree.root(), expected);

        let cc = tree.node(4).unwrap();
        assert_eq!(cc.left, Some(2));
        assert_eq!(cc.right, Some(2));
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn test_rebuild_is_stable() {
        let leaves: Vec<Hash> = (0..11).map(leaf).collect();
        let first = MerkleTree::build(&leaves).unwrap();
        let second = MerkleTree::build(&leaves).unwrap();
        assert_eq!(first.root(), second.root());
        assert_eq!(first, second);
    }

    #[test]
    fn test_order_matters() {
        let forward = merkle_root(&[leaf(1), leaf(2)]).unwrap();
        let reverse = merkle_root(&[leaf(2), leaf(1)]).unwrap();
        assert_ne!(forward, reverse);
    }

    #[test]
    fn test_branches_verify_for_every_leaf() {
        for count in 1..=9u8 {
            let leaves: Vec<Hash> = (0..count).map(leaf).collect();
            let tree = MerkleTree::build(&leaves).unwrap();
            for (i, l) in leaves.iter().enumerate() {
                let branch = tree.branch(i).unwrap();
                assert_eq!(branch.len(), tree.depth());
                assert!(verify_branch(l, &branch, i, &tree.root()), "{} of {}", i, count);
            }
        }
    }

    #[test]
    fn test_branch_rejects_wrong_leaf() {
        let leaves: Vec<Hash> = (0..4).map(leaf).collect();
        let tree = MerkleTree::build(&leaves).unwrap();
        let branch = tree.branch(1).unwrap();
        assert!(!verify_branch(&leaf(9), &branch, 1, &tree.root()));
        assert!(tree.branch(4).is_err());
    }
}
