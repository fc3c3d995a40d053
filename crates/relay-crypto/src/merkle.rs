/// Merkle inclusion proofs
///
/// Data-request and tally transactions of a finalized block are committed to by
/// two Merkle roots. Dependent contracts prove that a given leaf belongs to one
/// of those trees by presenting the sibling path from the leaf up to the root.
///
/// SAFETY GUARANTEES:
/// - Verification is pure and deterministic
/// - Sibling order is taken from the leaf index, least-significant bit first
/// - A proof's length equals the tree depth; there is no other failure mode
///   than returning `false`

use log::debug;
use serde::{Deserialize, Serialize};

use crate::hash::{combine, Hash256};

/// Check `leaf` against `root` given its sibling path and index.
///
/// At level `i`, bit `i` of `leaf_index` tells whether the running node is the
/// left (0) or the right (1) child: `H(node, sibling)` or `H(sibling, node)`.
pub fn verify(proof: &[Hash256], root: &Hash256, leaf_index: u64, leaf: &Hash256) -> bool {
    let mut index = leaf_index;
    let mut node = *leaf;
    for sibling in proof {
        node = if index & 1 == 0 {
            combine(&node, sibling)
        } else {
            combine(sibling, &node)
        };
        index >>= 1;
    }
    node == *root
}

/// A sibling path for a single leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Index of the leaf being proved
    pub leaf_index: u64,

    /// The leaf value itself
    pub leaf: Hash256,

    /// Siblings from the leaf level up to, but excluding, the root
    pub path: Vec<Hash256>,
}

impl MerkleProof {
    /// Verify this proof against a root.
    pub fn verify(&self, root: &Hash256) -> bool {
        verify(&self.path, root, self.leaf_index, &self.leaf)
    }
}

/// A complete Merkle tree built bottom-up with the verifier's combine rule.
///
/// An odd node out on any level is paired with itself.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `levels[0]` holds the leaves, the last level holds the root alone
    levels: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    /// Build a tree over the given leaves. Returns `None` for an empty set.
    pub fn from_leaves(leaves: Vec<Hash256>) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }

        let mut levels = vec![leaves];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<Hash256> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => combine(left, right),
                    [single] => combine(single, single),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }

        debug!("Built Merkle tree with {} levels", levels.len());
        Some(MerkleTree { levels })
    }

    pub fn root(&self) -> Hash256 {
        // from_leaves guarantees a non-empty top level
        self.levels[self.levels.len() - 1][0]
    }

    /// Number of siblings in every proof produced by this tree.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Produce the inclusion proof for the leaf at `leaf_index`.
    pub fn proof(&self, leaf_index: u64) -> Option<MerkleProof> {
        let start = usize::try_from(leaf_index).ok()?;
        let leaf = *self.levels[0].get(start)?;

        let mut path = Vec::with_capacity(self.depth());
        let mut position = start;
        for level in &self.levels[..self.depth()] {
            let sibling = position ^ 1;
            // Missing right sibling means the node was paired with itself
            path.push(*level.get(sibling).unwrap_or(&level[position]));
            position /= 2;
        }

        Some(MerkleProof { leaf_index, leaf, path })
    }
}
