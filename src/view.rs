// Encoded view: projects an indexed image into a flat symbol alphabet so
// that suffix sorting and matching see references as single atomic symbols
// instead of their raw bytes.
//
// Raw bytes map to themselves, non-leading reference bytes to a shared
// padding symbol, and each reference head to a symbol derived from its type
// and the label of its target. Until labels are installed for a pool, the
// target key doubles as the label.

use crate::image::{ImageIndex, Offset, PoolTag};

/// Symbol for every non-leading byte of a reference.
pub const REFERENCE_PADDING_PROJECTION: u32 = 256;
/// First symbol available to reference heads.
pub const BASE_REFERENCE_PROJECTION: u32 = 257;

#[derive(Clone, Debug)]
struct LabelMap {
    labels: Vec<u32>,
    bound: usize,
}

pub struct EncodedView<'a> {
    index: &'a ImageIndex<'a>,
    // One slot per pool; `None` means keys are used as labels.
    labels: Vec<Option<LabelMap>>,
}

impl<'a> EncodedView<'a> {
    pub fn new(index: &'a ImageIndex<'a>) -> Self {
        EncodedView {
            index,
            labels: vec![None; index.pool_count()],
        }
    }

    /// Installs the label of every target of `pool`. All labels must be
    /// below `bound`, and `bound` must be shared with the other image's
    /// view for their symbols to be comparable.
    pub fn set_labels(&mut self, pool: PoolTag, labels: Vec<u32>, bound: usize) {
        debug_assert_eq!(labels.len(), self.index.pool(pool).len());
        debug_assert!(labels.iter().all(|&label| (label as usize) < bound));
        self.labels[usize::from(pool.0)] = Some(LabelMap { labels, bound });
    }

    /// Symbol at `location`.
    pub fn projection(&self, location: Offset) -> u32 {
        match self.index.lookup_type(location) {
            None => u32::from(self.index.raw_value(location)),
            Some(type_tag) => {
                let refs = self.index.refs(type_tag);
                let reference = refs.at(location);
                if reference.location != location {
                    return REFERENCE_PADDING_PROJECTION;
                }
                let label = match &self.labels[usize::from(refs.pool_tag().0)] {
                    Some(map) => map.labels[reference.target_key as usize],
                    None => reference.target_key,
                };
                BASE_REFERENCE_PROJECTION
                    + label * self.index.type_count() as u32
                    + u32::from(type_tag.0)
            }
        }
    }

    /// Exclusive upper bound on the symbols this view can produce.
    pub fn cardinality(&self) -> usize {
        let max_bound = (0..self.index.pool_count())
            .map(|pool_idx| match &self.labels[pool_idx] {
                Some(map) => map.bound,
                None => self.index.pool(PoolTag(pool_idx as u8)).len(),
            })
            .max()
            .unwrap_or(0);
        BASE_REFERENCE_PROJECTION as usize + max_bound * self.index.type_count()
    }

    /// The whole image as a symbol sequence.
    pub fn symbols(&self) -> Vec<u32> {
        (0..self.len() as Offset).map(|i| self.projection(i)).collect()
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.index.size() == 0
    }

    pub fn image_index(&self) -> &'a ImageIndex<'a> {
        self.index
    }
}
