//! SHA-256 Merkle tree over package heads.
//!
//! One tree is built per epoch over the head hash of every package, in the
//! canonical (lexicographic-by-name) order. Leaves and interior nodes are
//! domain-separated so a leaf can never be reinterpreted as a node.
//!
//! An odd node at any level is promoted unchanged to the level above.

use crate::crypto::sha256;
use crate::types::Hash;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// One step of an authentication path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofStep {
    pub side: Side,
    pub sibling: Hash,
}

/// Merkle authentication path demonstrating that a specific head hash is a
/// leaf of a witnessed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionProof {
    pub leaf_index: u32,
    pub path: Vec<ProofStep>,
}

impl InclusionProof {
    /// Recompute the root from `leaf` along the path and compare.
    pub fn verify(&self, leaf: &Hash, root: &Hash) -> bool {
        let mut acc = leaf_hash(leaf);
        for step in &self.path {
            acc = match step.side {
                Side::Left => node_hash(&step.sibling, &acc),
                Side::Right => node_hash(&acc, &step.sibling),
            };
        }
        acc == *root
    }
}

/// A built tree: the root plus one inclusion proof per leaf, in leaf order.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    pub root: Hash,
    pub proofs: Vec<InclusionProof>,
}

impl MerkleTree {
    /// Build the tree over `leaves`. Returns `None` for an empty input;
    /// an epoch with no packages produces no witness.
    pub fn build(leaves: &[Hash]) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }

        let mut level: Vec<Hash> = leaves.iter().map(leaf_hash).collect();
        let mut paths: Vec<Vec<ProofStep>> = vec![Vec::new(); leaves.len()];
        // Position of each leaf's running hash within the current level.
        let mut positions: Vec<usize> = (0..leaves.len()).collect();

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                match pair {
                    [left, right] => next.push(node_hash(left, right)),
                    [odd] => next.push(*odd),
                    _ => unreachable!(),
                }
            }
            for (leaf, pos) in positions.iter_mut().enumerate() {
                let sibling = *pos ^ 1;
                if sibling < level.len() {
                    paths[leaf].push(ProofStep {
                        side: if sibling < *pos { Side::Left } else { Side::Right },
                        sibling: level[sibling],
                    });
                }
                *pos /= 2;
            }
            level = next;
        }

        Some(Self {
            root: level[0],
            proofs: paths
                .into_iter()
                .enumerate()
                .map(|(i, path)| InclusionProof {
                    leaf_index: i as u32,
                    path,
                })
                .collect(),
        })
    }
}

fn leaf_hash(leaf: &Hash) -> Hash {
    let mut buf = Vec::with_capacity(1 + Hash::LEN);
    buf.push(LEAF_PREFIX);
    buf.extend_from_slice(leaf.as_bytes());
    sha256(&buf)
}

fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut buf = Vec::with_capacity(1 + 2 * Hash::LEN);
    buf.push(NODE_PREFIX);
    buf.extend_from_slice(left.as_bytes());
    buf.extend_from_slice(right.as_bytes());
    sha256(&buf)
}
