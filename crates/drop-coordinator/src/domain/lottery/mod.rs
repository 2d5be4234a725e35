//! Verifiable weighted lottery: commit-reveal secret, a Merkle tree over
//! canonically-ordered participant leaves, and Fenwick-tree weighted
//! selection without replacement. Deterministic given `secret` and the
//! participant set, so anyone holding the revealed proof can replay it.

mod fenwick;
mod merkle;
mod prng;

pub use fenwick::FenwickTree;
pub use merkle::{MerkleProof, MerkleTree};
pub use prng::SeedStream;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single participant's entry in the weighted selection, ordered
/// canonically by `user_id` ascending before the tree is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LotteryLeaf {
    pub user_id: String,
    pub effective_tickets: u64,
    pub index: usize,
}

impl LotteryLeaf {
    /// Canonical JSON (sorted keys, no whitespace) so the leaf hash is
    /// reproducible independent of field declaration order.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        format!(
            r#"{{"effective_tickets":{},"index":{},"user_id":"{}"}}"#,
            self.effective_tickets, self.index, self.user_id
        )
        .into_bytes()
    }

    pub fn leaf_hash(&self) -> [u8; 32] {
        Sha256::digest(self.canonical_bytes()).into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotteryProof {
    pub commitment: String,
    pub secret: String,
    pub participant_merkle_root: String,
    pub participant_count: usize,
    pub seed: String,
    pub algorithm: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: time::OffsetDateTime,
    pub winners: Vec<String>,
    pub backup_winners: Vec<String>,
}

pub const ALGORITHM: &str = "weighted-fenwick-v2";

/// SHA256(secret) hex-encoded, published before the lottery runs.
pub fn commit(secret_hex: &str) -> String {
    let secret_bytes = hex::decode(secret_hex).unwrap_or_default();
    hex::encode(Sha256::digest(secret_bytes))
}

/// Generates a fresh random 32-byte secret, returned hex-encoded alongside
/// its commitment. Captured once at `initialize` time; replaying the same
/// drop must reuse the stored secret rather than regenerating it.
pub fn generate_secret() -> (String, String) {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let secret_hex = hex::encode(bytes);
    let commitment = commit(&secret_hex);
    (secret_hex, commitment)
}

/// Runs the full deterministic lottery: builds the Merkle tree over
/// `participants` (already sorted ascending by `user_id` by the caller),
/// derives the seed from `secret` and the Merkle root, and draws
/// `total_selected` distinct winners via weighted Fenwick sampling.
///
/// Returns `(merkle_root_hex, seed_hex, selected_user_ids)` where the first
/// `primary_winners` entries of the selection are winners and the rest are
/// backups.
pub fn run_lottery(
    secret_hex: &str,
    participants: &[LotteryLeaf],
    total_selected: usize,
) -> (String, String, Vec<String>) {
    if participants.is_empty() {
        let tree = MerkleTree::build(&[]);
        return (hex::encode(tree.root()), String::new(), Vec::new());
    }

    let tree = MerkleTree::build(participants);
    let merkle_root = tree.root();
    let merkle_root_hex = hex::encode(merkle_root);

    // seed = SHA256(secret_bytes || merkleRoot_bytes), raw bytes rather than
    // their hex encodings — keeps one canonical digest input a verifier can
    // recompute directly from the revealed secret and root without an extra
    // hex round-trip.
    let mut hasher = Sha256::new();
    hasher.update(hex::decode(secret_hex).unwrap_or_default());
    hasher.update(merkle_root);
    let seed: [u8; 32] = hasher.finalize().into();
    let seed_hex = hex::encode(seed);

    let k = total_selected.min(participants.len());
    if k >= participants.len() {
        let mut ids: Vec<String> = participants.iter().map(|p| p.user_id.clone()).collect();
        ids.sort();
        return (merkle_root_hex, seed_hex, ids);
    }

    let weights: Vec<u64> = participants.iter().map(|p| p.effective_tickets.max(1)).collect();
    let mut fenwick = FenwickTree::new(&weights);
    let mut stream = SeedStream::new(&seed);

    let mut selected = Vec::with_capacity(k);
    let mut current_total: u64 = weights.iter().sum();

    for _ in 0..k {
        if current_total == 0 {
            break;
        }
        let r = stream.next_u64() % current_total;
        let idx = fenwick.find_first_prefix_sum_greater_than(r);
        selected.push(participants[idx].user_id.clone());
        let w = fenwick.weight_at(idx);
        fenwick.update(idx, -(w as i64));
        current_total -= w;
    }

    (merkle_root_hex, seed_hex, selected)
}

/// Rebuilds the tree from the stored leaves and verifies a previously
/// issued inclusion proof for `leaf` against `expected_root`.
pub fn verify_inclusion(leaves: &[LotteryLeaf], leaf_index: usize, expected_root: &[u8; 32]) -> Option<MerkleProof> {
    let tree = MerkleTree::build(leaves);
    let proof = tree.proof(leaf_index)?;
    if proof.verify(&leaves[leaf_index].leaf_hash(), expected_root) {
        Some(proof)
    } else {
        None
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
    fn commitment_binds_secret() {
        let (secret, commitment) = generate_secret();
        assert_eq!(commit(&secret), commitment);
    }

    #[test]
    fn replay_determinism() {
        let participants = vec![leaf("alice", 1, 0), leaf("bob", 10, 1), leaf("carol", 2, 2)];
        let (secret, _) = generate_secret();

        let (root_a, seed_a, winners_a) = run_lottery(&secret, &participants, 2);
        let (root_b, seed_b, winners_b) = run_lottery(&secret, &participants, 2);

        assert_eq!(root_a, root_b);
        assert_eq!(seed_a, seed_b);
        assert_eq!(winners_a, winners_b);
    }

    #[test]
    fn selects_all_when_k_exceeds_participant_count() {
        let participants = vec![leaf("alice", 1, 0), leaf("bob", 2, 1)];
        let (secret, _) = generate_secret();
        let (_, _, winners) = run_lottery(&secret, &participants, 10);
        assert_eq!(winners.len(), 2);
    }

    #[test]
    fn empty_participants_yields_empty_selection() {
        let (_, _, winners) = run_lottery("ab", &[], 3);
        assert!(winners.is_empty());
    }

    #[test]
    fn weight_monotonicity_over_many_trials() {
        let participants = vec![leaf("alice", 1, 0), leaf("bob", 10, 1), leaf("carol", 2, 2)];
        let mut bob_wins = 0;
        let trials = 500;
        for _ in 0..trials {
            let (secret, _) = generate_secret();
            let (_, _, winners) = run_lottery(&secret, &participants, 1);
            if winners.first().map(|s| s.as_str()) == Some("bob") {
                bob_wins += 1;
            }
        }
        // bob carries 10/13 of the weight; allow a wide statistical band.
        let ratio = bob_wins as f64 / trials as f64;
        assert!(ratio > 0.55, "bob win ratio too low: {ratio}");
    }
}
