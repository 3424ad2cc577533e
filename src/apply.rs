// Patch application: reconstructs the new image from the old image plus the
// patch streams, then re-derives reference targets.
//
// Reference correction repeats the generator's walk exactly: the old index
// and offset mapper are rebuilt from the patch, reference locations are
// re-read from the reconstructed bytes (locations are already correct, only
// targets are stale), and the delta stream is consumed in the same order it
// was emitted.

use log::debug;

use crate::disasm::{Disassembler, DisassemblerProvider};
use crate::equivalence::OffsetMapper;
use crate::error::Error;
use crate::image::{Equivalence, ImageIndex, Offset, Reference, ReferenceTypeTraits};
use crate::patch::{checksum, Patch, PatchElement};
use crate::pool::TargetPool;
use crate::refset::ReferenceSet;

/// Applies `patch` to `old_image` and returns the reconstructed new image.
pub fn apply(
    old_image: &[u8],
    patch: &Patch,
    provider: &dyn DisassemblerProvider,
) -> Result<Vec<u8>, Error> {
    if old_image.len() != patch.header.old_size as usize
        || checksum(old_image) != patch.header.old_checksum
    {
        return Err(Error::InvalidOldImage);
    }
    if patch.elements.len() != 1 {
        return Err(Error::InvalidPatch("expected exactly one element"));
    }
    let element = &patch.elements[0];
    let disasm = provider
        .for_type(element.exe_type)
        .ok_or(Error::UnsupportedExeType(element.exe_type.code()))?;

    let new_image = apply_element(old_image, element, &*disasm)?;

    if new_image.len() != patch.header.new_size as usize
        || checksum(&new_image) != patch.header.new_checksum
    {
        return Err(Error::InvalidNewImage);
    }
    Ok(new_image)
}

/// Applies one element. The caller is responsible for whole-image checksum
/// verification.
pub fn apply_element(
    old_image: &[u8],
    element: &PatchElement,
    disasm: &dyn Disassembler,
) -> Result<Vec<u8>, Error> {
    if old_image.len() != element.old_size as usize {
        return Err(Error::InvalidOldImage);
    }
    element.validate()?;

    let mut new_image = copy_equivalences_and_extra_data(old_image, element);
    apply_raw_delta(element, &mut new_image);
    apply_references_delta(old_image, element, disasm, &mut new_image)?;
    debug!(
        "applied element: {} equivalences, {} raw deltas, {} reference deltas",
        element.equivalences.len(),
        element.raw_delta.len(),
        element.reference_delta.len()
    );
    Ok(new_image)
}

// Lays out the new image: copied equivalence regions with extra data
// spliced into the gaps. Bounds hold by element validation.
fn copy_equivalences_and_extra_data(old_image: &[u8], element: &PatchElement) -> Vec<u8> {
    let mut out = Vec::with_capacity(element.new_size as usize);
    let mut extra_pos = 0usize;
    let mut dst_offset: Offset = 0;
    for eq in &element.equivalences {
        let gap = (eq.dst_offset - dst_offset) as usize;
        out.extend_from_slice(&element.extra_data[extra_pos..extra_pos + gap]);
        extra_pos += gap;
        out.extend_from_slice(&old_image[eq.src_offset as usize..eq.src_end() as usize]);
        dst_offset = eq.dst_end();
    }
    out.extend_from_slice(&element.extra_data[extra_pos..]);
    debug_assert_eq!(out.len(), element.new_size as usize);
    out
}

// Applies sparse byte corrections. Copy offsets are cumulative across
// equivalences in destination order.
fn apply_raw_delta(element: &PatchElement, new_image: &mut [u8]) {
    let mut units = element.raw_delta.iter().peekable();
    let mut base_copy_offset: Offset = 0;
    for eq in &element.equivalences {
        while let Some(unit) = units.peek() {
            if unit.copy_offset >= base_copy_offset + eq.length {
                break;
            }
            let pos = (eq.dst_offset + (unit.copy_offset - base_copy_offset)) as usize;
            new_image[pos] = new_image[pos].wrapping_add(unit.diff as u8);
            units.next();
        }
        base_copy_offset += eq.length;
    }
    debug_assert!(units.next().is_none());
}

// Rewrites every reference the generator corrected. Must mirror the
// generator's walk byte for byte.
fn apply_references_delta(
    old_image: &[u8],
    element: &PatchElement,
    disasm: &dyn Disassembler,
    new_image: &mut Vec<u8>,
) -> Result<(), Error> {
    let groups = disasm.reference_groups();
    if groups.is_empty() {
        if !element.reference_delta.is_empty()
            || element.extra_targets.iter().any(|t| !t.is_empty())
        {
            return Err(Error::InvalidPatch("reference streams for a raw element"));
        }
        return Ok(());
    }

    let mut old_index = ImageIndex::new(old_image);
    old_index.initialize(disasm)?;
    if element.extra_targets.len() != old_index.pool_count() {
        return Err(Error::InvalidPatch("pool count mismatch"));
    }
    let mapper = OffsetMapper::new(element.equivalences.clone());

    let mut deltas = element.reference_delta.iter();
    for (pool_tag, old_pool) in old_index.target_pools() {
        let mut projected = old_pool.clone();
        projected.project(&mapper);
        projected.insert_targets(&element.extra_targets[usize::from(pool_tag.0)]);

        for &type_tag in old_pool.types() {
            let traits = old_index.refs(type_tag).traits();
            // Locations are already correct in the reconstructed bytes;
            // only the targets are stale.
            let dst_refs = disasm.read_references(traits, new_image);
            correct_references_for_type(
                old_index.refs(type_tag),
                &dst_refs,
                old_pool,
                &projected,
                &mapper,
                &element.equivalences,
                &mut deltas,
                disasm,
                traits,
                new_image,
            )?;
        }
    }
    if deltas.next().is_some() {
        return Err(Error::InvalidPatch("trailing reference deltas"));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn correct_references_for_type(
    src_refs: &ReferenceSet,
    dst_refs: &[Reference],
    old_pool: &TargetPool,
    projected_pool: &TargetPool,
    mapper: &OffsetMapper,
    equivalences: &[Equivalence],
    deltas: &mut std::slice::Iter<'_, i32>,
    disasm: &dyn Disassembler,
    traits: ReferenceTypeTraits,
    new_image: &mut [u8],
) -> Result<(), Error> {
    let width = traits.width;
    let src_list = src_refs.references();
    let mut dst_pos = 0usize;

    for equiv in equivalences {
        while dst_pos < dst_refs.len() && dst_refs[dst_pos].location < equiv.dst_offset {
            dst_pos += 1;
        }
        if dst_pos >= dst_refs.len() {
            break;
        }
        if dst_refs[dst_pos].location >= equiv.dst_end() {
            continue;
        }
        let src_location = equiv.src_offset + (dst_refs[dst_pos].location - equiv.dst_offset);
        let mut src_pos = src_list.partition_point(|r| r.location < src_location);
        while dst_pos < dst_refs.len() && dst_refs[dst_pos].location + width <= equiv.dst_end() {
            let Some(src_ref) = src_list.get(src_pos) else {
                break;
            };
            let delta = *deltas
                .next()
                .ok_or(Error::InvalidPatch("reference delta stream exhausted"))?;
            let old_target = old_pool.offset_for_key(src_ref.target_key);
            let expected_key = projected_pool.key_for_offset(mapper.project_offset(old_target));
            let new_key = i64::from(expected_key) + i64::from(delta);
            if new_key < 0 || new_key >= projected_pool.len() as i64 {
                return Err(Error::InvalidPatch("reference delta out of range"));
            }
            let target = projected_pool.offset_for_key(new_key as Offset);
            disasm.write_reference(
                traits,
                new_image,
                Reference { location: dst_refs[dst_pos].location, target },
            );
            dst_pos += 1;
            src_pos += 1;
        }
    }
    Ok(())
}
