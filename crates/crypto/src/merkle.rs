//! Domain-separated binary Merkle tree.
//!
//! - leaf = sha256(0x00 || data)
//! - node = sha256(0x01 || left || right)
//! - a node without a sibling is carried up to the next level unchanged
//!
//! Proofs are the ordered sibling hashes from leaf to root, each tagged with
//! the side the sibling sits on.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Hash32 = [u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

fn sha256(bytes: &[u8]) -> Hash32 {
    let mut h = Sha256::new();
    h.update(bytes);
    h.finalize().into()
}

pub fn leaf_hash(data: &[u8]) -> Hash32 {
    let mut buf = Vec::with_capacity(1 + data.len());
    buf.push(LEAF_PREFIX);
    buf.extend_from_slice(data);
    sha256(&buf)
}

pub fn node_hash(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut buf = [0u8; 65];
    buf[0] = NODE_PREFIX;
    buf[1..33].copy_from_slice(left);
    buf[33..65].copy_from_slice(right);
    sha256(&buf)
}

/// Side of the running hash a sibling is combined on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    #[serde(with = "hex32")]
    pub sibling: Hash32,
    pub position: Position,
}

/// Inclusion proof for one leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Index of the leaf in insertion order
    pub leaf_index: usize,
    /// Hash of the leaf being proven
    #[serde(with = "hex32")]
    pub leaf_hash: Hash32,
    /// Sibling path from leaf to root
    pub steps: Vec<ProofStep>,
    /// Root the proof was generated against
    #[serde(with = "hex32")]
    pub root: Hash32,
}

impl MerkleProof {
    /// Recompute the root from the leaf and siblings
    pub fn computed_root(&self) -> Hash32 {
        self.steps.iter().fold(self.leaf_hash, |acc, step| match step.position {
            Position::Left => node_hash(&step.sibling, &acc),
            Position::Right => node_hash(&acc, &step.sibling),
        })
    }

    pub fn verify(&self) -> bool {
        self.computed_root() == self.root
    }

    /// Verify against an externally held root
    pub fn verify_against(&self, root: &Hash32) -> bool {
        self.verify() && &self.root == root
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash32>>,
}

impl MerkleTree {
    /// Build a tree over raw leaf payloads
    pub fn from_data<T: AsRef<[u8]>>(items: &[T]) -> Self {
        Self::from_leaf_hashes(items.iter().map(|d| leaf_hash(d.as_ref())).collect())
    }

    pub fn from_leaf_hashes(leaves: Vec<Hash32>) -> Self {
        let mut levels = vec![leaves];
        while levels.last().map_or(0, Vec::len) > 1 {
            let next = levels
                .last()
                .map(|level| {
                    level
                        .chunks(2)
                        .map(|pair| match pair {
                            [left, right] => node_hash(left, right),
                            _ => pair[0],
                        })
                        .collect()
                })
                .unwrap_or_default();
            levels.push(next);
        }
        Self { levels }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    /// Root hash; an empty tree hashes the empty string
    pub fn root(&self) -> Hash32 {
        match self.levels.last() {
            Some(top) if top.len() == 1 => top[0],
            _ => sha256(b""),
        }
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    pub fn leaf(&self, index: usize) -> Option<Hash32> {
        self.levels.first()?.get(index).copied()
    }

    pub fn proof(&self, leaf_index: usize) -> Option<MerkleProof> {
        let leaf_hash = self.leaf(leaf_index)?;
        let mut steps = Vec::new();
        let mut index = leaf_index;

        for level in &self.levels[..self.levels.len() - 1] {
            if index % 2 == 1 {
                steps.push(ProofStep {
                    sibling: level[index - 1],
                    position: Position::Left,
                });
            } else if let Some(sibling) = level.get(index + 1) {
                steps.push(ProofStep {
                    sibling: *sibling,
                    position: Position::Right,
                });
            }
            index /= 2;
        }

        Some(MerkleProof {
            leaf_index,
            leaf_hash,
            steps,
            root: self.root(),
        })
    }
}

mod hex32 {
    use super::Hash32;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash32, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| de::Error::custom("expected 32-byte hash"))
    }
}
