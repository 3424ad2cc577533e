// Reference set: all references of one type, sorted by location, with
// targets stored as keys into the type's target pool.

use crate::error::Error;
use crate::image::{IndirectReference, Offset, PoolTag, Reference, ReferenceTypeTraits};
use crate::pool::TargetPool;

#[derive(Clone, Debug)]
pub struct ReferenceSet {
    traits: ReferenceTypeTraits,
    references: Vec<IndirectReference>,
}

impl ReferenceSet {
    pub fn new(traits: ReferenceTypeTraits) -> Self {
        ReferenceSet {
            traits,
            references: Vec::new(),
        }
    }

    /// Converts targets to pool keys and stores the references. Fails if
    /// the disassembler delivered them out of location order.
    pub fn init_references(
        &mut self,
        references: &[Reference],
        pool: &TargetPool,
    ) -> Result<(), Error> {
        debug_assert!(self.references.is_empty());
        if !references.windows(2).all(|w| w[0].location < w[1].location) {
            return Err(Error::Disassembly("references not sorted by location"));
        }
        self.references = references
            .iter()
            .map(|r| IndirectReference {
                location: r.location,
                target_key: pool.key_for_offset(r.target),
            })
            .collect();
        Ok(())
    }

    /// The reference covering `offset`. Must only be called with an offset
    /// inside some reference of this set.
    pub fn at(&self, offset: Offset) -> IndirectReference {
        let pos = self.references.partition_point(|r| r.location <= offset);
        debug_assert!(pos > 0);
        let found = self.references[pos - 1];
        debug_assert!(offset < found.location + self.traits.width);
        found
    }

    pub fn references(&self) -> &[IndirectReference] {
        &self.references
    }

    pub fn traits(&self) -> ReferenceTypeTraits {
        self.traits
    }

    pub fn pool_tag(&self) -> PoolTag {
        self.traits.pool_tag
    }

    pub fn width(&self) -> Offset {
        self.traits.width
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}
