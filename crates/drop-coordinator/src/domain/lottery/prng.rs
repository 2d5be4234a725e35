use sha2::{Digest, Sha256};

/// Deterministic PRNG keyed by the lottery seed: `rand64(seed, round) =
/// SHA256(seed || round_be_bytes)`, truncated to the first 8 bytes.
/// Re-derivable by any verifier holding the revealed seed.
pub struct SeedStream {
    seed: [u8; 32],
    round: u64,
}

impl SeedStream {
    pub fn new(seed: &[u8; 32]) -> Self {
        Self { seed: *seed, round: 0 }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(self.round.to_be_bytes());
        let digest = hasher.finalize();
        self.round += 1;
        u64::from_be_bytes(digest[0..8].try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_yields_same_stream() {
        let seed = [7u8; 32];
        let mut a = SeedStream::new(&seed);
        let mut b = SeedStream::new(&seed);
        for _ in 0..10 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn successive_draws_differ() {
        let seed = [3u8; 32];
        let mut stream = SeedStream::new(&seed);
        let first = stream.next_u64();
        let second = stream.next_u64();
        assert_ne!(first, second);
    }
}
