use std::marker::PhantomData;

use rand::Rng;
use rand::SeedableRng;

use crate::basic_types::Random;
use crate::basic_types::StorageKey;

/// Hashes sets of integers in `[0, n)` in O(1) per element: each element gets
/// a random 64-bit tag and the hash of a set is the xor of the tags. The hash
/// is independent of the set order, provided there are no duplicates, and can
/// be maintained incrementally.
#[derive(Debug)]
pub(crate) struct NonOrderedSetHasher<I> {
    hashes: Vec<u64>,
    key: PhantomData<I>,
}

impl<I: StorageKey> NonOrderedSetHasher<I> {
    pub(crate) fn new() -> Self {
        NonOrderedSetHasher {
            hashes: vec![],
            key: PhantomData,
        }
    }

    pub(crate) fn initialize(&mut self, size: usize, seed: u64) {
        let mut random = Random::seed_from_u64(seed);
        self.hashes = (0..size).map(|_| random.gen::<u64>()).collect();
    }

    /// Ignores the given element in all subsequent hash computations. Reset
    /// by the next [`NonOrderedSetHasher::initialize`].
    pub(crate) fn ignore_element(&mut self, element: I) {
        self.hashes[element.index()] = 0;
    }

    pub(crate) fn hash(&self, element: I) -> u64 {
        self.hashes[element.index()]
    }

    pub(crate) fn is_initialized(&self) -> bool {
        !self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_types::ConstraintIndex;

    #[test]
    fn set_hash_is_order_independent() {
        let mut hasher: NonOrderedSetHasher<ConstraintIndex> = NonOrderedSetHasher::new();
        hasher.initialize(8, 42);
        let forward =
            hasher.hash(ConstraintIndex(1)) ^ hasher.hash(ConstraintIndex(4));
        let backward =
            hasher.hash(ConstraintIndex(4)) ^ hasher.hash(ConstraintIndex(1));
        assert_eq!(forward, backward);
    }

    #[test]
    fn ignored_element_does_not_change_the_hash() {
        let mut hasher: NonOrderedSetHasher<ConstraintIndex> = NonOrderedSetHasher::new();
        hasher.initialize(8, 42);
        hasher.ignore_element(ConstraintIndex(0));
        let with = hasher.hash(ConstraintIndex(0)) ^ hasher.hash(ConstraintIndex(3));
        assert_eq!(with, hasher.hash(ConstraintIndex(3)));
    }
}
