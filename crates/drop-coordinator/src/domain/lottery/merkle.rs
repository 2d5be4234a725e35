use super::LotteryLeaf;
use sha2::{Digest, Sha256};

/// A Merkle inclusion proof: the sibling hash at each level from leaf to
/// root, paired with which side the sibling sits on.
#[derive(Debug, Clone)]
pub struct MerkleProof {
    pub siblings: Vec<([u8; 32], Side)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl MerkleProof {
    pub fn verify(&self, leaf_hash: &[u8; 32], expected_root: &[u8; 32]) -> bool {
        let mut current = *leaf_hash;
        for (sibling, side) in &self.siblings {
            current = match side {
                Side::Left => hash_pair(sibling, &current),
                Side::Right => hash_pair(&current, sibling),
            };
        }
        &current == expected_root
    }
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// A Merkle tree over weighted participant leaves. Odd-length levels
/// duplicate the last node, matching the canonical construction used by the
/// seed derivation so any verifier rebuilding from revealed leaves gets the
/// same root.
pub struct MerkleTree {
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    pub fn build(leaves: &[LotteryLeaf]) -> Self {
        if leaves.is_empty() {
            return MerkleTree {
                levels: vec![vec![[0u8; 32]]],
            };
        }

        let mut levels = vec![leaves.iter().map(|l| l.leaf_hash()).collect::<Vec<_>>()];

        while levels.last().unwrap().len() > 1 {
            let current = levels.last().unwrap();
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            let mut i = 0;
            while i < current.len() {
                let left = current[i];
                let right = if i + 1 < current.len() {
                    current[i + 1]
                } else {
                    current[i]
                };
                next.push(hash_pair(&left, &right));
                i += 2;
            }
            levels.push(next);
        }

        MerkleTree { levels }
    }

    pub fn root(&self) -> [u8; 32] {
        self.levels.last().unwrap()[0]
    }

    pub fn proof(&self, mut index: usize) -> Option<MerkleProof> {
        if index >= self.levels[0].len() {
            return None;
        }
        let mut siblings = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let is_right = index % 2 == 1;
            let sibling_index = if is_right { index - 1 } else { (index + 1).min(level.len() - 1) };
            let sibling = level[sibling_index];
            siblings.push((
                sibling,
                if is_right { Side::Left } else { Side::Right },
            ));
            index /= 2;
        }
        Some(MerkleProof { siblings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str, tickets: u64, idx: usize) -> LotteryLeaf {
        LotteryLeaf {
            user_id: id.to_string(),
            effective_tickets: tickets,
            index: idx,
        }
    }

    #[test]
    fn single_leaf_inclusion() {
        let leaves = vec![leaf("alice", 1, 0)];
        let tree = MerkleTree::build(&leaves);
        let proof = tree.proof(0).unwrap();
        assert!(proof.verify(&leaves[0].leaf_hash(), &tree.root()));
    }

    #[test]
    fn every_leaf_verifies_in_odd_sized_tree() {
        let leaves: Vec<_> = (0..5).map(|i| leaf(&format!("u{i}"), i as u64 + 1, i)).collect();
        let tree = MerkleTree::build(&leaves);
        for (i, l) in leaves.iter().enumerate() {
            let proof = tree.proof(i).unwrap();
            assert!(proof.verify(&l.leaf_hash(), &tree.root()));
        }
    }

    #[test]
    fn tampered_leaf_fails_verification() {
        let leaves = vec![leaf("alice", 1, 0), leaf("bob", 5, 1), leaf("carol", 2, 2)];
        let tree = MerkleTree::build(&leaves);
        let proof = tree.proof(1).unwrap();
        let tampered = leaf("bob", 999, 1);
        assert!(!proof.verify(&tampered.leaf_hash(), &tree.root()));
    }
}
