//! Traversal order generation for the queue
//!
//! Shuffle never reorders stored entries. It only produces a permutation of
//! storage indices that `next` walks, so turning shuffle off restores the
//! original order for free.

use rand::seq::SliceRandom;
use rand::Rng;

/// Build a traversal permutation over `len` entries
///
/// Without shuffle this is the identity. With shuffle the `pinned` index (the
/// current entry) comes first, followed by the remaining indices in random
/// order (Fisher-Yates).
pub fn traversal_order<R: Rng + ?Sized>(
    len: usize,
    pinned: Option<usize>,
    shuffle: bool,
    rng: &mut R,
) -> Vec<usize> {
    if !shuffle {
        return (0..len).collect();
    }

    let pinned = pinned.filter(|&index| index < len);
    let mut rest: Vec<usize> = (0..len).filter(|&i| Some(i) != pinned).collect();
    rest.shuffle(rng);

    let mut order = Vec::with_capacity(len);
    order.extend(pinned);
    order.extend(rest);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn unshuffled_is_identity() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(traversal_order(4, Some(2), false, &mut rng), vec![0, 1, 2, 3]);
    }

    #[test]
    fn shuffled_keeps_pinned_first() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let order = traversal_order(6, Some(3), true, &mut rng);
            assert_eq!(order[0], 3);
        }
    }

    #[test]
    fn shuffled_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(42);
        let order = traversal_order(10, None, true, &mut rng);
        let unique: HashSet<usize> = order.iter().copied().collect();
        assert_eq!(order.len(), 10);
        assert_eq!(unique.len(), 10);
        assert!(order.iter().all(|&i| i < 10));
    }

    #[test]
    fn shuffle_changes_order() {
        let mut rng = StdRng::seed_from_u64(1);
        let identity: Vec<usize> = (0..8).collect();
        let changed = (0..10).any(|_| traversal_order(8, None, true, &mut rng) != identity);
        assert!(changed);
    }

    #[test]
    fn empty_and_out_of_range_pin() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(traversal_order(0, Some(0), true, &mut rng).is_empty());
        assert_eq!(traversal_order(2, Some(9), true, &mut rng).len(), 2);
    }
}
