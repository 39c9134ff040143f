use super::IdFactory;
use crate::model::OwnerId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest prime below 2^32; it is 3 mod 4, so squaring permutes [0, PRIME)
const PRIME: u32 = 4_294_967_291;
const INTERMEDIATE_XOR: u32 = 0x5bf0_3635;
const SEED_XOR: u32 = 0x4679_0905;

/// Scatters a counter through a quadratic-residue permutation of `u32`
///
/// The first 2^32 ids are a bijection of the counter; past that the
/// counter itself is used, which cannot collide with permuted values.
#[derive(Debug)]
pub struct RandomPermutationIdFactory {
    shift: u32,
    index: AtomicU64,
    offset: u32,
}

impl RandomPermutationIdFactory {
    pub fn new(shift: u32) -> Self {
        Self::with_seed(shift, rand::random())
    }

    pub fn with_seed(shift: u32, seed: u32) -> Self {
        Self {
            shift,
            index: AtomicU64::new(0),
            offset: permute(seed ^ SEED_XOR),
        }
    }

    fn scatter(&self, index: u64) -> u64 {
        match u32::try_from(index) {
            Ok(i) => {
                u64::from(permute(permute(i).wrapping_add(self.offset) ^ INTERMEDIATE_XOR))
            }
            Err(_) => index,
        }
    }
}

fn permute(x: u32) -> u32 {
    if x >= PRIME {
        return x;
    }
    let residue = ((u64::from(x) * u64::from(x)) % u64::from(PRIME)) as u32;
    if x <= PRIME / 2 {
        residue
    } else {
        PRIME - residue
    }
}

impl IdFactory for RandomPermutationIdFactory {
    fn next_id(&self) -> OwnerId {
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        self.scatter(index) << self.shift
    }

    fn shift(&self) -> u32 {
        self.shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_permute_is_injective_on_sample() {
        let values: HashSet<u32> = (0..100_000u32).map(permute).collect();
        assert_eq!(values.len(), 100_000);

        let high: HashSet<u32> = (PRIME - 50_000..=u32::MAX).map(permute).collect();
        assert_eq!(high.len(), (u32::MAX - (PRIME - 50_000)) as usize + 1);
    }

    #[test]
    fn test_seeded_sequence_is_reproducible() {
        let a = RandomPermutationIdFactory::with_seed(0, 42);
        let b = RandomPermutationIdFactory::with_seed(0, 42);
        let first: Vec<_> = (0..10).map(|_| a.next_id()).collect();
        let second: Vec<_> = (0..10).map(|_| b.next_id()).collect();
        assert_eq!(first, second);
        assert_ne!(first, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_past_permuted_range_uses_counter() {
        let ids = RandomPermutationIdFactory::with_seed(0, 7);
        assert_eq!(ids.scatter(1 << 32), 1 << 32);
        assert!(ids.scatter(5) <= u64::from(u32::MAX));
    }
}
