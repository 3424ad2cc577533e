// Target affinity: evidence-based association between the targets of one
// pool across two image versions.
//
// Every equivalence that aligns an old target with a new target contributes
// its similarity as evidence for that pair. Pairs are then associated
// greedily, strongest first, one-to-one. The association feeds back into
// matching twice: token similarity consults it to score reference pairs, and
// strongly associated targets receive shared labels so the encoded views
// project them to identical symbols.

use std::collections::BTreeMap;

use crate::equivalence::EquivalenceMap;
use crate::image::Offset;

#[derive(Clone, Copy, Debug, Default)]
struct Association {
    other: Offset,
    // Accumulated evidence; zero means unassociated.
    affinity: f64,
}

#[derive(Clone, Debug, Default)]
pub struct TargetsAffinity {
    // Indexed by old target key.
    forward: Vec<Association>,
    // Indexed by new target key.
    backward: Vec<Association>,
}

impl TargetsAffinity {
    /// Rebuilds associations from an equivalence map and the sorted target
    /// lists of both versions of the pool.
    pub fn infer_from_similarities(
        &mut self,
        map: &EquivalenceMap,
        old_targets: &[Offset],
        new_targets: &[Offset],
    ) {
        self.forward = vec![Association::default(); old_targets.len()];
        self.backward = vec![Association::default(); new_targets.len()];
        if old_targets.is_empty() || new_targets.is_empty() {
            return;
        }

        let mut weights: BTreeMap<(Offset, Offset), f64> = BTreeMap::new();
        for candidate in map.iter() {
            if candidate.similarity <= 0.0 {
                continue;
            }
            let eq = candidate.eq;
            let begin = new_targets.partition_point(|&t| t < eq.dst_offset);
            let end = new_targets.partition_point(|&t| t < eq.dst_end());
            for new_key in begin..end {
                // The old offset this new target aligns with under `eq`.
                let old_target = new_targets[new_key] - eq.dst_offset + eq.src_offset;
                if let Ok(old_key) = old_targets.binary_search(&old_target) {
                    *weights
                        .entry((old_key as Offset, new_key as Offset))
                        .or_insert(0.0) += candidate.similarity;
                }
            }
        }

        // Greedy one-to-one association, strongest evidence first; ties
        // break on key order for determinism.
        let mut pairs: Vec<((Offset, Offset), f64)> = weights.into_iter().collect();
        pairs.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        for ((old_key, new_key), weight) in pairs {
            if weight <= 0.0 {
                continue;
            }
            if self.forward[old_key as usize].affinity == 0.0
                && self.backward[new_key as usize].affinity == 0.0
            {
                self.forward[old_key as usize] = Association { other: new_key, affinity: weight };
                self.backward[new_key as usize] = Association { other: old_key, affinity: weight };
            }
        }
    }

    /// Affinity between an old and a new target: positive if they are
    /// associated with each other, negative if either is associated
    /// elsewhere, zero if both are free.
    pub fn affinity_between(&self, old_key: Offset, new_key: Offset) -> f64 {
        // A default-constructed affinity treats every target as free.
        let forward = self.forward.get(old_key as usize).copied().unwrap_or_default();
        let backward = self.backward.get(new_key as usize).copied().unwrap_or_default();
        if forward.affinity > 0.0 && forward.other == new_key {
            debug_assert_eq!(backward.other, old_key);
            return forward.affinity;
        }
        if forward.affinity > 0.0 || backward.affinity > 0.0 {
            return -forward.affinity.max(backward.affinity);
        }
        0.0
    }

    /// Assigns labels: pairs with affinity at or above `min_affinity` share
    /// one label; every remaining target gets a fresh unique label, so
    /// unassociated targets never alias. Returns the exclusive label bound,
    /// valid for both label vectors.
    pub fn assign_labels(
        &self,
        min_affinity: f64,
        old_labels: &mut Vec<u32>,
        new_labels: &mut Vec<u32>,
    ) -> usize {
        const UNASSIGNED: u32 = u32::MAX;
        old_labels.clear();
        old_labels.resize(self.forward.len(), UNASSIGNED);
        new_labels.clear();
        new_labels.resize(self.backward.len(), UNASSIGNED);

        let mut label: u32 = 0;
        for (old_key, assoc) in self.forward.iter().enumerate() {
            if assoc.affinity > 0.0 && assoc.affinity >= min_affinity {
                old_labels[old_key] = label;
                debug_assert_eq!(new_labels[assoc.other as usize], UNASSIGNED);
                new_labels[assoc.other as usize] = label;
                label += 1;
            }
        }
        for slot in old_labels.iter_mut().chain(new_labels.iter_mut()) {
            if *slot == UNASSIGNED {
                *slot = label;
                label += 1;
            }
        }
        label as usize
    }
}
