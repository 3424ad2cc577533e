// Core image model: offsets, reference tags, equivalences, and the
// per-image index the matching engine works against.
//
// An `ImageIndex` borrows the image bytes and records, for every byte,
// whether it belongs to a reference and of which type. It owns one
// `ReferenceSet` per reference type and one `TargetPool` per pool.

use crate::disasm::Disassembler;
use crate::error::Error;
use crate::pool::TargetPool;
use crate::refset::ReferenceSet;

/// Byte offset into an image. Images are capped at 4 GiB.
pub type Offset = u32;

/// Identifier of one reference type, dense from zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeTag(pub u8);

/// Identifier of one target pool, dense from zero. Each type draws its
/// targets from exactly one pool; a pool may serve several types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolTag(pub u8);

/// A reference as a disassembler reports it: an absolute target offset
/// encoded somewhere at `location`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reference {
    pub location: Offset,
    pub target: Offset,
}

/// A reference with its target replaced by the key into the owning pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndirectReference {
    pub location: Offset,
    pub target_key: Offset,
}

/// Static description of one reference type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferenceTypeTraits {
    /// Encoded width in bytes. Every reference of the type spans
    /// `[location, location + width)`.
    pub width: Offset,
    pub type_tag: TypeTag,
    pub pool_tag: PoolTag,
}

/// A matched region: `length` bytes at `src_offset` in the old image
/// correspond to `length` bytes at `dst_offset` in the new image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Equivalence {
    pub src_offset: Offset,
    pub dst_offset: Offset,
    pub length: Offset,
}

impl Equivalence {
    pub fn src_end(&self) -> Offset {
        self.src_offset + self.length
    }

    pub fn dst_end(&self) -> Offset {
        self.dst_offset + self.length
    }
}

/// An equivalence together with its similarity score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EquivalenceCandidate {
    pub eq: Equivalence,
    pub similarity: f64,
}

// Sentinel in the per-byte type table for bytes outside any reference.
const NO_TYPE: u8 = u8::MAX;

/// Reference-aware index over one image.
pub struct ImageIndex<'a> {
    image: &'a [u8],
    type_tags: Vec<u8>,
    reference_sets: Vec<ReferenceSet>,
    target_pools: Vec<TargetPool>,
}

impl<'a> ImageIndex<'a> {
    /// Creates an index with no references. Usable as-is for raw images.
    pub fn new(image: &'a [u8]) -> Self {
        ImageIndex {
            image,
            type_tags: vec![NO_TYPE; image.len()],
            reference_sets: Vec::new(),
            target_pools: Vec::new(),
        }
    }

    /// Extracts all references via `disasm` and populates the type table,
    /// target pools, and reference sets.
    ///
    /// Fails if the disassembler reports references that are out of bounds,
    /// overlapping, or not sorted by location. Callers treat that as a
    /// structural problem with the input and fall back to raw mode.
    pub fn initialize(&mut self, disasm: &dyn Disassembler) -> Result<(), Error> {
        debug_assert!(self.reference_sets.is_empty());
        let groups = disasm.reference_groups();

        let mut refs_by_type = Vec::with_capacity(groups.len());
        let mut pool_count = 0usize;
        for (type_idx, traits) in groups.iter().enumerate() {
            if usize::from(traits.type_tag.0) != type_idx {
                return Err(Error::Disassembly("reference groups not dense by type"));
            }
            pool_count = pool_count.max(usize::from(traits.pool_tag.0) + 1);
            let refs = disasm.read_references(*traits, self.image);
            self.mark_reference_spans(traits, &refs)?;
            refs_by_type.push(refs);
        }

        let mut pools = vec![TargetPool::new(); pool_count];
        for (traits, refs) in groups.iter().zip(&refs_by_type) {
            let pool = &mut pools[usize::from(traits.pool_tag.0)];
            pool.add_type(traits.type_tag);
            pool.insert_targets_from_references(refs);
        }

        let mut sets = Vec::with_capacity(groups.len());
        for (traits, refs) in groups.iter().zip(refs_by_type) {
            let mut set = ReferenceSet::new(*traits);
            set.init_references(&refs, &pools[usize::from(traits.pool_tag.0)])?;
            sets.push(set);
        }

        self.reference_sets = sets;
        self.target_pools = pools;
        Ok(())
    }

    fn mark_reference_spans(
        &mut self,
        traits: &ReferenceTypeTraits,
        refs: &[Reference],
    ) -> Result<(), Error> {
        for r in refs {
            let begin = r.location as usize;
            let end = begin.saturating_add(traits.width as usize);
            if end > self.image.len() {
                return Err(Error::Disassembly("reference out of image bounds"));
            }
            for tag in &mut self.type_tags[begin..end] {
                if *tag != NO_TYPE {
                    return Err(Error::Disassembly("overlapping references"));
                }
                *tag = traits.type_tag.0;
            }
        }
        Ok(())
    }

    pub fn image(&self) -> &'a [u8] {
        self.image
    }

    pub fn size(&self) -> usize {
        self.image.len()
    }

    pub fn raw_value(&self, offset: Offset) -> u8 {
        self.image[offset as usize]
    }

    /// Type of the reference covering `offset`, or `None` for a raw byte.
    pub fn lookup_type(&self, offset: Offset) -> Option<TypeTag> {
        match self.type_tags[offset as usize] {
            NO_TYPE => None,
            t => Some(TypeTag(t)),
        }
    }

    pub fn is_reference(&self, offset: Offset) -> bool {
        self.type_tags[offset as usize] != NO_TYPE
    }

    /// A token is an atomic unit of matching: a raw byte, or the leading
    /// byte of a reference.
    pub fn is_token(&self, offset: Offset) -> bool {
        match self.lookup_type(offset) {
            None => true,
            Some(t) => self.refs(t).at(offset).location == offset,
        }
    }

    pub fn refs(&self, type_tag: TypeTag) -> &ReferenceSet {
        &self.reference_sets[usize::from(type_tag.0)]
    }

    pub fn pool(&self, pool_tag: PoolTag) -> &TargetPool {
        &self.target_pools[usize::from(pool_tag.0)]
    }

    pub fn type_count(&self) -> usize {
        self.reference_sets.len()
    }

    pub fn pool_count(&self) -> usize {
        self.target_pools.len()
    }

    /// Target pools in ascending pool-tag order.
    pub fn target_pools(&self) -> impl Iterator<Item = (PoolTag, &TargetPool)> {
        self.target_pools
            .iter()
            .enumerate()
            .map(|(idx, pool)| (PoolTag(idx as u8), pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::testing::ListDisassembler;

    #[test]
    fn raw_index_has_only_tokens() {
        let data = [1u8, 2, 3, 4];
        let index = ImageIndex::new(&data);
        assert_eq!(index.size(), 4);
        assert_eq!(index.type_count(), 0);
        assert_eq!(index.pool_count(), 0);
        for offset in 0..4 {
            assert_eq!(index.lookup_type(offset), None);
            assert!(!index.is_reference(offset));
            assert!(index.is_token(offset));
            assert_eq!(index.raw_value(offset), data[offset as usize] as u8);
        }
    }

    #[test]
    fn initialize_marks_reference_spans() {
        // Width-2 references of one type at offsets 2 and 6.
        let data = [10u8, 11, 12, 13, 14, 15, 16, 17, 18, 19];
        let disasm = ListDisassembler::new(vec![(
            2,
            vec![
                Reference { location: 2, target: 0 },
                Reference { location: 6, target: 4 },
            ],
        )]);
        let mut index = ImageIndex::new(&data);
        index.initialize(&disasm).unwrap();

        assert_eq!(index.type_count(), 1);
        assert_eq!(index.pool_count(), 1);
        for offset in [2u32, 3, 6, 7] {
            assert_eq!(index.lookup_type(offset), Some(TypeTag(0)));
        }
        for offset in [0u32, 1, 4, 5, 8, 9] {
            assert_eq!(index.lookup_type(offset), None);
            assert!(index.is_token(offset));
        }
        // Only the leading byte of each reference is a token.
        assert!(index.is_token(2));
        assert!(!index.is_token(3));
        assert!(index.is_token(6));
        assert!(!index.is_token(7));

        assert_eq!(index.pool(PoolTag(0)).targets(), &[0, 4]);
    }

    #[test]
    fn initialize_rejects_out_of_bounds_reference() {
        let data = [0u8; 4];
        let disasm =
            ListDisassembler::new(vec![(2, vec![Reference { location: 3, target: 0 }])]);
        let mut index = ImageIndex::new(&data);
        assert!(matches!(
            index.initialize(&disasm),
            Err(Error::Disassembly(_))
        ));
    }

    #[test]
    fn initialize_rejects_overlapping_references() {
        let data = [0u8; 8];
        let disasm = ListDisassembler::new(vec![(
            4,
            vec![
                Reference { location: 0, target: 0 },
                Reference { location: 2, target: 4 },
            ],
        )]);
        let mut index = ImageIndex::new(&data);
        assert!(matches!(
            index.initialize(&disasm),
            Err(Error::Disassembly(_))
        ));
    }
}
