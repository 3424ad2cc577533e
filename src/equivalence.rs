// Equivalence discovery: token similarity scoring, greedy bidirectional
// extension of seeds, candidate collection over the old suffix array, and
// overlap pruning into a non-overlapping correspondence. `OffsetMapper`
// turns the final map into an old-offset to new-offset projection.

use crate::affinity::TargetsAffinity;
use crate::image::{Equivalence, EquivalenceCandidate, ImageIndex, Offset};
use crate::suffix_array::suffix_lower_bound;
use crate::view::EncodedView;

/// Similarity sentinel for token pairs that must never align.
pub const MISMATCH_FATAL: f64 = f64::NEG_INFINITY;

/// Similarity of the tokens at `src` in the old image and `dst` in the new
/// image. Mixing a raw byte with a reference, or two reference types, is
/// fatal. Reference pairs are scored by the affinity of their targets,
/// scaled by the reference width so a matched pointer outweighs the raw
/// bytes it displaces.
pub fn get_token_similarity(
    old_index: &ImageIndex,
    new_index: &ImageIndex,
    affinities: &[TargetsAffinity],
    src: Offset,
    dst: Offset,
) -> f64 {
    match (old_index.lookup_type(src), new_index.lookup_type(dst)) {
        (None, None) => {
            if old_index.raw_value(src) == new_index.raw_value(dst) {
                1.0
            } else {
                -1.5
            }
        }
        (Some(old_type), Some(new_type)) if old_type == new_type => {
            let old_refs = old_index.refs(old_type);
            let new_refs = new_index.refs(new_type);
            let old_ref = old_refs.at(src);
            let new_ref = new_refs.at(dst);
            let pool = usize::from(old_refs.pool_tag().0);
            let width = f64::from(old_refs.width());
            let affinity = affinities[pool].affinity_between(old_ref.target_key, new_ref.target_key);
            if affinity > 0.0 {
                width
            } else if affinity == 0.0 {
                0.5 * width
            } else {
                -2.0 * width
            }
        }
        _ => MISMATCH_FATAL,
    }
}

/// Total similarity over an equivalence region: the sum over new-image
/// tokens, with reference padding contributing nothing.
pub fn get_equivalence_similarity(
    old_index: &ImageIndex,
    new_index: &ImageIndex,
    affinities: &[TargetsAffinity],
    eq: &Equivalence,
) -> f64 {
    let mut similarity = 0.0;
    for k in 0..eq.length {
        let dst = eq.dst_offset + k;
        if !new_index.is_token(dst) {
            continue;
        }
        let token = get_token_similarity(old_index, new_index, affinities, eq.src_offset + k, dst);
        if token == MISMATCH_FATAL {
            return MISMATCH_FATAL;
        }
        similarity += token;
    }
    similarity
}

/// Extends `candidate` forward greedily. The walk keeps a running total and
/// rolls back to the best-scoring end; it gives up once the running total
/// falls more than `base_similarity` below the best seen, or immediately on
/// a type mismatch. Trailing reference padding extends the region.
pub fn extend_equivalence_forward(
    old_index: &ImageIndex,
    new_index: &ImageIndex,
    affinities: &[TargetsAffinity],
    candidate: EquivalenceCandidate,
    base_similarity: f64,
) -> EquivalenceCandidate {
    let mut eq = candidate.eq;
    let src_limit = old_index.size() as Offset;
    let dst_limit = new_index.size() as Offset;

    let mut best_length = eq.length;
    let mut best_similarity = candidate.similarity;
    let mut running = candidate.similarity;
    let mut k = eq.length;
    while eq.src_offset + k < src_limit && eq.dst_offset + k < dst_limit {
        let src = eq.src_offset + k;
        let dst = eq.dst_offset + k;
        if old_index.lookup_type(src) != new_index.lookup_type(dst) {
            break;
        }
        let token = if new_index.is_token(dst) {
            get_token_similarity(old_index, new_index, affinities, src, dst)
        } else {
            0.0
        };
        if token == MISMATCH_FATAL {
            break;
        }
        running += token;
        if running >= best_similarity {
            best_similarity = running;
            best_length = k + 1;
        } else if best_similarity - running > base_similarity {
            break;
        }
        k += 1;
    }

    eq.length = best_length;
    EquivalenceCandidate { eq, similarity: best_similarity }
}

/// Extends `candidate` backward with the same backoff rule. The start is
/// only ever anchored at a token boundary, so an equivalence never begins
/// inside a reference.
pub fn extend_equivalence_backward(
    old_index: &ImageIndex,
    new_index: &ImageIndex,
    affinities: &[TargetsAffinity],
    candidate: EquivalenceCandidate,
    base_similarity: f64,
) -> EquivalenceCandidate {
    let mut eq = candidate.eq;
    let mut best_k: Offset = 0;
    let mut best_similarity = candidate.similarity;
    let mut running = candidate.similarity;
    let mut k: Offset = 0;
    while k < eq.src_offset && k < eq.dst_offset {
        let src = eq.src_offset - k - 1;
        let dst = eq.dst_offset - k - 1;
        if old_index.lookup_type(src) != new_index.lookup_type(dst) {
            break;
        }
        let at_token = new_index.is_token(dst);
        let token = if at_token {
            get_token_similarity(old_index, new_index, affinities, src, dst)
        } else {
            0.0
        };
        if token == MISMATCH_FATAL {
            break;
        }
        running += token;
        k += 1;
        if at_token && running >= best_similarity {
            best_similarity = running;
            best_k = k;
        } else if best_similarity - running > base_similarity {
            break;
        }
    }

    eq.src_offset -= best_k;
    eq.dst_offset -= best_k;
    eq.length += best_k;
    EquivalenceCandidate { eq, similarity: best_similarity }
}

/// Grows a candidate from the seed pair `(src, dst)`: forward extension
/// first, then backward if the forward result clears `min_similarity`.
/// Returns a zero-length candidate for unpromising seeds.
pub fn visit_equivalence_seed(
    old_index: &ImageIndex,
    new_index: &ImageIndex,
    affinities: &[TargetsAffinity],
    src: Offset,
    dst: Offset,
    min_similarity: f64,
) -> EquivalenceCandidate {
    let empty = EquivalenceCandidate {
        eq: Equivalence { src_offset: src, dst_offset: dst, length: 0 },
        similarity: 0.0,
    };
    if src >= old_index.size() as Offset || !old_index.is_token(src) {
        return empty;
    }
    let mut candidate =
        extend_equivalence_forward(old_index, new_index, affinities, empty, min_similarity);
    if candidate.similarity < min_similarity {
        return empty;
    }
    candidate =
        extend_equivalence_backward(old_index, new_index, affinities, candidate, min_similarity);
    candidate
}

// ---------------------------------------------------------------------------
// EquivalenceMap
// ---------------------------------------------------------------------------

/// The pruned set of matched regions: sorted and non-overlapping in new
/// (destination) coordinates. Source regions may overlap freely.
#[derive(Clone, Debug, Default)]
pub struct EquivalenceMap {
    candidates: Vec<EquivalenceCandidate>,
}

impl EquivalenceMap {
    pub fn new() -> Self {
        EquivalenceMap::default()
    }

    /// Builds a map directly from candidates, sorting by destination.
    /// Intended for tests and for reconstructing state from a patch.
    pub fn from_candidates(candidates: Vec<EquivalenceCandidate>) -> Self {
        let mut map = EquivalenceMap { candidates };
        map.sort_by_destination();
        map
    }

    /// Rebuilds the map: seed candidates against the old suffix array,
    /// sort, and prune overlaps.
    pub fn build(
        &mut self,
        old_sa: &[u32],
        old_view: &EncodedView,
        new_view: &EncodedView,
        affinities: &[TargetsAffinity],
        min_similarity: f64,
    ) {
        self.candidates.clear();
        self.create_candidates(old_sa, old_view, new_view, affinities, min_similarity);
        self.sort_by_destination();
        self.prune(old_view, new_view, affinities, min_similarity);
        log::debug!(
            "equivalence map: {} regions covering {} bytes",
            self.candidates.len(),
            self.candidates.iter().map(|c| u64::from(c.eq.length)).sum::<u64>()
        );
    }

    fn create_candidates(
        &mut self,
        old_sa: &[u32],
        old_view: &EncodedView,
        new_view: &EncodedView,
        affinities: &[TargetsAffinity],
        min_similarity: f64,
    ) {
        let old_index = old_view.image_index();
        let new_index = new_view.image_index();
        let old_symbols = old_view.symbols();
        let new_symbols = new_view.symbols();

        let dst_limit = new_view.len() as Offset;
        let mut dst_offset: Offset = 0;
        while dst_offset < dst_limit {
            if !new_index.is_token(dst_offset) {
                dst_offset += 1;
                continue;
            }
            let pos =
                suffix_lower_bound(old_sa, &old_symbols, &new_symbols[dst_offset as usize..]);

            // Seed from the two suffixes bracketing the query and keep the
            // better extension.
            let mut best = EquivalenceCandidate {
                eq: Equivalence { src_offset: 0, dst_offset, length: 0 },
                similarity: 0.0,
            };
            let below = pos.checked_sub(1);
            let above = (pos < old_sa.len()).then_some(pos);
            for sa_pos in [below, above].into_iter().flatten() {
                let candidate = visit_equivalence_seed(
                    old_index,
                    new_index,
                    affinities,
                    old_sa[sa_pos],
                    dst_offset,
                    min_similarity,
                );
                if candidate.eq.length > 0
                    && (best.eq.length == 0 || candidate.similarity > best.similarity)
                {
                    best = candidate;
                }
            }

            if best.eq.length > 0 {
                dst_offset = best.eq.dst_end().max(dst_offset + 1);
                self.candidates.push(best);
            } else {
                dst_offset += 1;
            }
        }
    }

    fn sort_by_destination(&mut self) {
        self.candidates.sort_by(|a, b| {
            (a.eq.dst_offset, a.eq.src_offset, a.eq.length)
                .cmp(&(b.eq.dst_offset, b.eq.src_offset, b.eq.length))
        });
    }

    // Resolves destination overlaps by cropping the lower-similarity
    // candidate, recomputing its score, and discarding what falls below the
    // floor or shrinks to nothing.
    fn prune(
        &mut self,
        old_view: &EncodedView,
        new_view: &EncodedView,
        affinities: &[TargetsAffinity],
        min_similarity: f64,
    ) {
        let old_index = old_view.image_index();
        let new_index = new_view.image_index();

        for i in 0..self.candidates.len() {
            let mut j = i + 1;
            while j < self.candidates.len() {
                let current = self.candidates[i];
                if current.eq.length == 0 {
                    break;
                }
                let next = self.candidates[j];
                if next.eq.dst_offset >= current.eq.dst_end() {
                    break;
                }
                if next.eq.length == 0 {
                    j += 1;
                    continue;
                }
                let overlap = current.eq.dst_end() - next.eq.dst_offset;
                if next.similarity <= current.similarity {
                    self.candidates[j] =
                        crop_front(next, overlap, old_index, new_index, affinities);
                    j += 1;
                } else {
                    self.candidates[i] =
                        crop_back(current, overlap, old_index, new_index, affinities);
                    break;
                }
            }
        }

        // Crops may have shifted starts past later candidates; restore order
        // and squeeze out any residual overlap front-to-back.
        self.candidates
            .retain(|c| c.eq.length > 0 && c.similarity >= min_similarity);
        self.sort_by_destination();
        let mut prev_end: Offset = 0;
        for i in 0..self.candidates.len() {
            let candidate = self.candidates[i];
            if candidate.eq.dst_offset < prev_end {
                let overlap = prev_end - candidate.eq.dst_offset;
                self.candidates[i] =
                    crop_front(candidate, overlap, old_index, new_index, affinities);
            }
            if self.candidates[i].eq.length > 0 {
                prev_end = self.candidates[i].eq.dst_end();
            }
        }
        self.candidates
            .retain(|c| c.eq.length > 0 && c.similarity >= min_similarity);
    }

    pub fn iter(&self) -> impl Iterator<Item = &EquivalenceCandidate> {
        self.candidates.iter()
    }

    pub fn as_slice(&self) -> &[EquivalenceCandidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Total new-image bytes covered by equivalences.
    pub fn coverage(&self) -> u64 {
        self.candidates.iter().map(|c| u64::from(c.eq.length)).sum()
    }
}

// Crops `amount` bytes off the front, advancing past reference padding so
// the region never starts mid-reference, then rescores.
fn crop_front(
    mut candidate: EquivalenceCandidate,
    amount: Offset,
    old_index: &ImageIndex,
    new_index: &ImageIndex,
    affinities: &[TargetsAffinity],
) -> EquivalenceCandidate {
    let mut delta = amount.min(candidate.eq.length);
    while delta < candidate.eq.length && !new_index.is_token(candidate.eq.dst_offset + delta) {
        delta += 1;
    }
    if delta >= candidate.eq.length {
        candidate.eq.length = 0;
        candidate.similarity = 0.0;
        return candidate;
    }
    candidate.eq.src_offset += delta;
    candidate.eq.dst_offset += delta;
    candidate.eq.length -= delta;
    candidate.similarity =
        get_equivalence_similarity(old_index, new_index, affinities, &candidate.eq);
    candidate
}

// Crops `amount` bytes off the back, retreating to a token boundary so the
// region never ends mid-reference, then rescores.
fn crop_back(
    mut candidate: EquivalenceCandidate,
    amount: Offset,
    old_index: &ImageIndex,
    new_index: &ImageIndex,
    affinities: &[TargetsAffinity],
) -> EquivalenceCandidate {
    let mut delta = amount.min(candidate.eq.length);
    while delta < candidate.eq.length
        && !new_index.is_token(candidate.eq.dst_offset + candidate.eq.length - delta)
    {
        delta += 1;
    }
    if delta >= candidate.eq.length {
        candidate.eq.length = 0;
        candidate.similarity = 0.0;
        return candidate;
    }
    candidate.eq.length -= delta;
    candidate.similarity =
        get_equivalence_similarity(old_index, new_index, affinities, &candidate.eq);
    candidate
}

// ---------------------------------------------------------------------------
// OffsetMapper
// ---------------------------------------------------------------------------

/// Projects old-image offsets into new-image coordinates through a set of
/// equivalences, kept sorted and non-overlapping by source offset.
#[derive(Clone, Debug, Default)]
pub struct OffsetMapper {
    equivalences: Vec<Equivalence>,
}

impl OffsetMapper {
    pub fn new(mut equivalences: Vec<Equivalence>) -> Self {
        equivalences.sort_by(|a, b| {
            (a.src_offset, a.dst_offset, a.length).cmp(&(b.src_offset, b.dst_offset, b.length))
        });
        // Source spans may overlap; keep the earlier entry intact and crop
        // the front of the later one.
        let mut prev_end: Offset = 0;
        for eq in &mut equivalences {
            if eq.src_offset < prev_end {
                let delta = prev_end - eq.src_offset;
                if delta >= eq.length {
                    eq.length = 0;
                    continue;
                }
                eq.src_offset += delta;
                eq.dst_offset += delta;
                eq.length -= delta;
            }
            prev_end = eq.src_end();
        }
        equivalences.retain(|eq| eq.length > 0);
        OffsetMapper { equivalences }
    }

    pub fn from_equivalence_map(map: &EquivalenceMap) -> Self {
        OffsetMapper::new(map.iter().map(|c| c.eq).collect())
    }

    /// Projects a single offset. Offsets past an equivalence extrapolate
    /// linearly from the nearest preceding one; offsets before the first
    /// equivalence extrapolate backward, saturating at zero. An empty
    /// mapper is the identity.
    pub fn project_offset(&self, offset: Offset) -> Offset {
        if self.equivalences.is_empty() {
            return offset;
        }
        let pos = self.equivalences.partition_point(|eq| eq.src_offset <= offset);
        if pos == 0 {
            let first = self.equivalences[0];
            return first.dst_offset.saturating_sub(first.src_offset - offset);
        }
        let eq = self.equivalences[pos - 1];
        eq.dst_offset + (offset - eq.src_offset)
    }

    /// Projects a batch in place, keeping only offsets literally covered by
    /// an equivalence span. Relative order of survivors is preserved.
    pub fn project_offsets(&self, offsets: &mut Vec<Offset>) {
        offsets.retain_mut(|offset| {
            let pos = self.equivalences.partition_point(|eq| eq.src_offset <= *offset);
            if pos == 0 {
                return false;
            }
            let eq = self.equivalences[pos - 1];
            if *offset < eq.src_end() {
                *offset = eq.dst_offset + (*offset - eq.src_offset);
                true
            } else {
                false
            }
        });
    }

    pub fn equivalences(&self) -> &[Equivalence] {
        &self.equivalences
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::testing::ListDisassembler;
    use crate::image::{PoolTag, Reference};
    use crate::suffix_array::make_suffix_array;

    // Builds an index over `data` with width-2 references of up to three
    // types; types 0 and 1 share pool 0, type 2 uses pool 1.
    fn indexed<'a>(
        data: &'a [u8],
        refs0: Vec<Reference>,
        refs1: Vec<Reference>,
        refs2: Vec<Reference>,
    ) -> ImageIndex<'a> {
        let disasm = ListDisassembler::with_pools(vec![
            (2, 0, refs0),
            (2, 0, refs1),
            (2, 1, refs2),
        ]);
        let mut index = ImageIndex::new(data);
        index.initialize(&disasm).unwrap();
        index
    }

    fn raw_indexed(data: &[u8]) -> ImageIndex<'_> {
        indexed(data, vec![], vec![], vec![])
    }

    fn no_affinity(index: &ImageIndex) -> Vec<TargetsAffinity> {
        vec![TargetsAffinity::default(); index.pool_count()]
    }

    // Affinities inferred from a literal equivalence map.
    fn affinities_of(
        map: &EquivalenceMap,
        old_index: &ImageIndex,
        new_index: &ImageIndex,
    ) -> Vec<TargetsAffinity> {
        (0..old_index.pool_count())
            .map(|pool_idx| {
                let pool = PoolTag(pool_idx as u8);
                let mut affinity = TargetsAffinity::default();
                affinity.infer_from_similarities(
                    map,
                    old_index.pool(pool).targets(),
                    new_index.pool(pool).targets(),
                );
                affinity
            })
            .collect()
    }

    fn map_of(entries: &[(Equivalence, f64)]) -> EquivalenceMap {
        EquivalenceMap::from_candidates(
            entries
                .iter()
                .map(|&(eq, similarity)| EquivalenceCandidate { eq, similarity })
                .collect(),
        )
    }

    fn reference(location: Offset, target: Offset) -> Reference {
        Reference { location, target }
    }

    #[test]
    fn token_similarity_raw_bytes() {
        let old = raw_indexed(b"ab");
        let new = raw_indexed(b"aq");
        let affinities = no_affinity(&old);
        assert_eq!(get_token_similarity(&old, &new, &affinities, 0, 0), 1.0);
        assert_eq!(get_token_similarity(&old, &new, &affinities, 1, 1), -1.5);
    }

    #[test]
    fn token_similarity_references() {
        // Old "ab1122334455": type-0 refs at 2,4,6,8; type-1 ref at 10.
        // New "a11b22334455": type-0 refs at 1,4,6,8; type-1 ref at 10.
        let old_data = b"ab1122334455";
        let new_data = b"a11b22334455";
        let old = indexed(
            old_data,
            vec![reference(2, 0), reference(4, 1), reference(6, 2), reference(8, 2)],
            vec![reference(10, 3)],
            vec![],
        );
        let new = indexed(
            new_data,
            vec![reference(1, 0), reference(4, 1), reference(6, 2), reference(8, 2)],
            vec![reference(10, 3)],
            vec![],
        );
        // Two associations: old key 0 with new key 0, old key 1 with new
        // key 2, fed by a literal map.
        let map = map_of(&[
            (Equivalence { src_offset: 0, dst_offset: 0, length: 1 }, 1.0),
            (Equivalence { src_offset: 1, dst_offset: 2, length: 1 }, 1.0),
        ]);
        let affinities = affinities_of(&map, &old, &new);

        // Associated targets: strong positive.
        assert!(get_token_similarity(&old, &new, &affinities, 2, 1) > 0.0);
        assert!(get_token_similarity(&old, &new, &affinities, 4, 6) > 0.0);
        // Both targets free: weak positive.
        assert!(get_token_similarity(&old, &new, &affinities, 6, 4) > 0.0);
        assert!(get_token_similarity(&old, &new, &affinities, 8, 4) > 0.0);
        // Conflicting association: negative.
        assert!(get_token_similarity(&old, &new, &affinities, 2, 4) < 0.0);
        assert!(get_token_similarity(&old, &new, &affinities, 2, 6) < 0.0);
        // Raw byte against a reference head is fatal either way.
        assert_eq!(
            get_token_similarity(&old, &new, &affinities, 0, 1),
            MISMATCH_FATAL
        );
        assert_eq!(
            get_token_similarity(&old, &new, &affinities, 2, 0),
            MISMATCH_FATAL
        );
        // Different reference types are fatal too.
        assert_eq!(
            get_token_similarity(&old, &new, &affinities, 2, 10),
            MISMATCH_FATAL
        );
        assert_eq!(
            get_token_similarity(&old, &new, &affinities, 10, 1),
            MISMATCH_FATAL
        );
    }

    #[test]
    fn extend_forward_plain_bytes() {
        let cases: &[(&[u8], &[u8], Offset)] = &[
            (b"", b"", 0),
            (b"banana", b"banana", 6),
            (b"banana", b"bananas", 6),
            (b"bananas", b"banana", 6),
            (b"banana", b"zzzz", 0),
        ];
        for &(old_data, new_data, want) in cases {
            let old = raw_indexed(old_data);
            let new = raw_indexed(new_data);
            let affinities = no_affinity(&old);
            let seed = EquivalenceCandidate {
                eq: Equivalence { src_offset: 0, dst_offset: 0, length: 0 },
                similarity: 0.0,
            };
            let got = extend_equivalence_forward(&old, &new, &affinities, seed, 8.0);
            assert_eq!(got.eq.length, want, "old {:?}", old_data);
        }
    }

    #[test]
    fn extend_forward_crosses_small_dips() {
        // Two mismatches between "banana" and "pineapple" are crossed; the
        // extension reaches the end of the shared tail.
        let old = raw_indexed(b"foobanana11xxpineapplexx");
        let new = raw_indexed(b"banana11yypineappleyy");
        let affinities = no_affinity(&old);
        let seed = EquivalenceCandidate {
            eq: Equivalence { src_offset: 3, dst_offset: 0, length: 0 },
            similarity: 0.0,
        };
        let got = extend_equivalence_forward(&old, &new, &affinities, seed, 8.0);
        assert_eq!(
            got.eq,
            Equivalence { src_offset: 3, dst_offset: 0, length: 19 }
        );
    }

    #[test]
    fn extend_forward_rolls_back_after_deep_dip() {
        // Eight mismatching filler bytes drag the running score more than
        // the margin below the best; extension stops at "banana".
        let old = raw_indexed(b"bananaxxxxxxxxpineapple");
        let new = raw_indexed(b"bananayyyyyyyypineapple");
        let affinities = no_affinity(&old);
        let seed = EquivalenceCandidate {
            eq: Equivalence { src_offset: 0, dst_offset: 0, length: 0 },
            similarity: 0.0,
        };
        let got = extend_equivalence_forward(&old, &new, &affinities, seed, 4.0);
        assert_eq!(got.eq.length, 6);
    }

    #[test]
    fn extend_backward_plain_bytes() {
        let old = raw_indexed(b"11banana");
        let new = raw_indexed(b"22banana");
        let affinities = no_affinity(&old);
        // Seeded at the end with nothing matched yet; only "banana" extends.
        let seed = EquivalenceCandidate {
            eq: Equivalence { src_offset: 8, dst_offset: 8, length: 0 },
            similarity: 0.0,
        };
        let got = extend_equivalence_backward(&old, &new, &affinities, seed, 8.0);
        assert_eq!(
            got.eq,
            Equivalence { src_offset: 2, dst_offset: 2, length: 6 }
        );

        let old = raw_indexed(b"11banana");
        let new = raw_indexed(b"11banana");
        let affinities = no_affinity(&old);
        let seed = EquivalenceCandidate {
            eq: Equivalence { src_offset: 8, dst_offset: 8, length: 0 },
            similarity: 0.0,
        };
        let got = extend_equivalence_backward(&old, &new, &affinities, seed, 8.0);
        assert_eq!(
            got.eq,
            Equivalence { src_offset: 0, dst_offset: 0, length: 8 }
        );
    }

    #[test]
    fn extend_backward_no_match() {
        let old = raw_indexed(b"banana");
        let new = raw_indexed(b"zzzz");
        let affinities = no_affinity(&old);
        let seed = EquivalenceCandidate {
            eq: Equivalence { src_offset: 6, dst_offset: 4, length: 0 },
            similarity: 0.0,
        };
        let got = extend_equivalence_backward(&old, &new, &affinities, seed, 8.0);
        assert_eq!(
            got.eq,
            Equivalence { src_offset: 6, dst_offset: 4, length: 0 }
        );
    }

    fn build_map(old_index: &ImageIndex, new_index: &ImageIndex, min_similarity: f64) -> EquivalenceMap {
        let affinities = no_affinity(old_index);
        let old_view = EncodedView::new(old_index);
        let new_view = EncodedView::new(new_index);
        let old_sa = make_suffix_array(&old_view.symbols(), old_view.cardinality());
        let mut map = EquivalenceMap::new();
        map.build(&old_sa, &old_view, &new_view, &affinities, min_similarity);
        map
    }

    fn check_map_invariants(map: &EquivalenceMap, old_size: usize, new_size: usize, min: f64) {
        let mut prev_end = 0;
        for candidate in map.iter() {
            assert!(candidate.eq.length > 0);
            assert!(candidate.similarity >= min);
            assert!(candidate.eq.src_end() as usize <= old_size);
            assert!(candidate.eq.dst_end() as usize <= new_size);
            assert!(candidate.eq.dst_offset >= prev_end);
            prev_end = candidate.eq.dst_end();
        }
    }

    #[test]
    fn build_covers_identical_raw_images() {
        let old = raw_indexed(b"banana");
        let new = raw_indexed(b"banana");
        let map = build_map(&old, &new, 4.0);
        check_map_invariants(&map, 6, 6, 4.0);
        assert_eq!(map.coverage(), 6);
    }

    #[test]
    fn build_coverage_with_references() {
        // Identical bytes, same-typed references with identical structure:
        // everything matches, including the reference bytes.
        let old_data = b"banana11";
        let new_data = b"banana11";
        let old = indexed(old_data, vec![reference(6, 0)], vec![], vec![]);
        let new = indexed(new_data, vec![reference(6, 0)], vec![], vec![]);
        let map = build_map(&old, &new, 4.0);
        check_map_invariants(&map, 8, 8, 4.0);
        assert_eq!(map.coverage(), 8);

        // Same bytes, but the trailing reference changes type: the match
        // cannot cross into it.
        let old = indexed(old_data, vec![reference(6, 0)], vec![], vec![]);
        let new = indexed(new_data, vec![], vec![reference(6, 0)], vec![]);
        let map = build_map(&old, &new, 4.0);
        check_map_invariants(&map, 8, 8, 4.0);
        assert_eq!(map.coverage(), 6);
    }

    #[test]
    fn build_matches_disjoint_regions() {
        let old = raw_indexed(b"banana11pineapple");
        let new = raw_indexed(b"banana22pineapple");
        let map = build_map(&old, &new, 4.0);
        check_map_invariants(&map, 17, 17, 4.0);
        assert!(map.coverage() >= 15);
    }

    #[test]
    fn build_splits_around_deep_dip() {
        let old = raw_indexed(b"bananaxxxxxxxxpineapple");
        let new = raw_indexed(b"bananayyyyyyyypineapple");
        let map = build_map(&old, &new, 4.0);
        check_map_invariants(&map, 23, 23, 4.0);
        // "banana" and "pineapple" match; the filler does not.
        assert_eq!(map.coverage(), 15);
    }

    #[test]
    fn build_finds_shifted_match() {
        let old = raw_indexed(b"foobanana");
        let new = raw_indexed(b"banana11foobanana");
        let map = build_map(&old, &new, 4.0);
        check_map_invariants(&map, 9, 17, 4.0);
        assert!(map.coverage() >= 15);
    }

    #[test]
    fn build_empty_images() {
        let old = raw_indexed(b"");
        let new = raw_indexed(b"banana");
        assert!(build_map(&old, &new, 4.0).is_empty());
        let old = raw_indexed(b"banana");
        let new = raw_indexed(b"");
        assert!(build_map(&old, &new, 4.0).is_empty());
    }

    #[test]
    fn project_offset_interpolates_and_extrapolates() {
        let mapper = OffsetMapper::new(vec![
            Equivalence { src_offset: 0, dst_offset: 10, length: 2 },
            Equivalence { src_offset: 2, dst_offset: 13, length: 1 },
            Equivalence { src_offset: 4, dst_offset: 16, length: 2 },
        ]);
        assert_eq!(mapper.project_offset(0), 10);
        assert_eq!(mapper.project_offset(1), 11);
        assert_eq!(mapper.project_offset(2), 13);
        // Uncovered offsets extrapolate from the preceding equivalence.
        assert_eq!(mapper.project_offset(3), 14);
        assert_eq!(mapper.project_offset(4), 16);
        assert_eq!(mapper.project_offset(5), 17);
        assert_eq!(mapper.project_offset(6), 18);
        assert_eq!(mapper.project_offset(7), 19);
    }

    #[test]
    fn project_offset_before_first_equivalence() {
        let mapper = OffsetMapper::new(vec![
            Equivalence { src_offset: 4, dst_offset: 10, length: 2 },
        ]);
        assert_eq!(mapper.project_offset(3), 9);
        assert_eq!(mapper.project_offset(0), 6);
        let far = OffsetMapper::new(vec![
            Equivalence { src_offset: 8, dst_offset: 2, length: 2 },
        ]);
        // Backward extrapolation saturates at zero.
        assert_eq!(far.project_offset(0), 0);
        assert_eq!(far.project_offset(7), 1);
    }

    #[test]
    fn empty_mapper_is_identity() {
        let mapper = OffsetMapper::new(vec![]);
        assert_eq!(mapper.project_offset(0), 0);
        assert_eq!(mapper.project_offset(1234), 1234);
    }

    #[test]
    fn project_offsets_keeps_covered_only() {
        let mapper = OffsetMapper::new(vec![
            Equivalence { src_offset: 0, dst_offset: 10, length: 2 },
            Equivalence { src_offset: 2, dst_offset: 13, length: 1 },
            Equivalence { src_offset: 4, dst_offset: 16, length: 2 },
        ]);
        let mut offsets = vec![0, 1, 2, 3, 4, 5, 6, 7];
        mapper.project_offsets(&mut offsets);
        assert_eq!(offsets, vec![10, 11, 13, 16, 17]);
    }

    #[test]
    fn mapper_prunes_source_overlaps() {
        // The second entry overlaps the first in source space; its front is
        // cropped so projection stays a function.
        let mapper = OffsetMapper::new(vec![
            Equivalence { src_offset: 0, dst_offset: 0, length: 4 },
            Equivalence { src_offset: 2, dst_offset: 10, length: 4 },
        ]);
        assert_eq!(
            mapper.equivalences(),
            &[
                Equivalence { src_offset: 0, dst_offset: 0, length: 4 },
                Equivalence { src_offset: 4, dst_offset: 12, length: 2 },
            ]
        );
        assert_eq!(mapper.project_offset(1), 1);
        assert_eq!(mapper.project_offset(4), 12);
        assert_eq!(mapper.project_offset(5), 13);
    }
}
