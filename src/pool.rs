// Target pool: the ordered set of distinct target offsets for one pool,
// shared by every reference type that draws from it. A target's key is its
// index in the sorted list, so keys are stable and dense.

use crate::equivalence::OffsetMapper;
use crate::image::{Offset, Reference, TypeTag};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetPool {
    // Strictly increasing.
    targets: Vec<Offset>,
    // Types that draw targets from this pool.
    types: Vec<TypeTag>,
}

impl TargetPool {
    pub fn new() -> Self {
        TargetPool::default()
    }

    /// Builds a pool from an already sorted, duplicate-free target list.
    pub fn from_targets(targets: Vec<Offset>) -> Self {
        debug_assert!(targets.windows(2).all(|w| w[0] < w[1]));
        TargetPool {
            targets,
            types: Vec::new(),
        }
    }

    pub fn add_type(&mut self, type_tag: TypeTag) {
        self.types.push(type_tag);
    }

    pub fn types(&self) -> &[TypeTag] {
        &self.types
    }

    pub fn insert_targets_from_references(&mut self, references: &[Reference]) {
        self.targets.extend(references.iter().map(|r| r.target));
        self.sort_and_dedup();
    }

    pub fn insert_targets(&mut self, targets: &[Offset]) {
        self.targets.extend_from_slice(targets);
        self.sort_and_dedup();
    }

    fn sort_and_dedup(&mut self) {
        self.targets.sort_unstable();
        self.targets.dedup();
    }

    /// Key of `offset` if present, otherwise the key it would occupy.
    /// Callers that need existence must check `offset_for_key` back.
    pub fn key_for_offset(&self, offset: Offset) -> Offset {
        self.targets.partition_point(|&t| t < offset) as Offset
    }

    /// Target offset stored under `key`. `key` must be in bounds.
    pub fn offset_for_key(&self, key: Offset) -> Offset {
        self.targets[key as usize]
    }

    pub fn targets(&self) -> &[Offset] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Rewrites every target into new-image coordinates, dropping targets
    /// not covered by any equivalence, then restores ordering.
    pub fn project(&mut self, mapper: &OffsetMapper) {
        mapper.project_offsets(&mut self.targets);
        self.sort_and_dedup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_sorts_and_dedups() {
        let mut pool = TargetPool::new();
        pool.insert_targets(&[7, 1, 4, 1, 7]);
        assert_eq!(pool.targets(), &[1, 4, 7]);
        pool.insert_targets_from_references(&[
            Reference { location: 0, target: 4 },
            Reference { location: 8, target: 2 },
        ]);
        assert_eq!(pool.targets(), &[1, 2, 4, 7]);
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn key_offset_round_trip() {
        let pool = TargetPool::from_targets(vec![0, 2, 3, 5]);
        assert_eq!(pool.key_for_offset(0), 0);
        assert_eq!(pool.key_for_offset(2), 1);
        assert_eq!(pool.key_for_offset(3), 2);
        assert_eq!(pool.key_for_offset(5), 3);
        for key in 0..4 {
            assert_eq!(pool.key_for_offset(pool.offset_for_key(key)), key);
        }
        // Absent offsets land on the insertion point.
        assert_eq!(pool.key_for_offset(1), 1);
        assert_eq!(pool.key_for_offset(4), 3);
        assert_eq!(pool.key_for_offset(6), 4);
    }

    #[test]
    fn project_drops_uncovered_targets() {
        use crate::image::Equivalence;

        let mapper = OffsetMapper::new(vec![
            Equivalence { src_offset: 0, dst_offset: 10, length: 2 },
            Equivalence { src_offset: 4, dst_offset: 16, length: 2 },
        ]);
        let mut pool = TargetPool::from_targets(vec![0, 1, 3, 4, 5]);
        pool.project(&mapper);
        assert_eq!(pool.targets(), &[10, 11, 16, 17]);
    }
}
