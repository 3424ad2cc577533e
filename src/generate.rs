// Patch generation: the affinity/equivalence refinement loop and the
// emission of the patch streams.
//
// Matching runs for a fixed number of iterations. Each pass infers target
// associations from the previous equivalence map (a no-op on the first
// pass), installs labels for strongly associated targets so both views
// project them identically, rebuilds the old suffix array, and rebuilds the
// map. Emission then walks the final map once per stream.

use log::{info, warn};

use crate::affinity::TargetsAffinity;
use crate::apply;
use crate::disasm::{detect_element, Disassembler, DisassemblerProvider, ExecutableType};
use crate::equivalence::{EquivalenceMap, OffsetMapper};
use crate::error::Error;
use crate::image::{ImageIndex, Offset, PoolTag};
use crate::patch::{checksum, Patch, PatchElement, PatchHeader, RawDeltaUnit};
use crate::pool::TargetPool;
use crate::refset::ReferenceSet;
use crate::suffix_array::make_suffix_array;
use crate::view::EncodedView;

/// Tuning knobs for generation. The defaults are the calibrated production
/// values; they interact, so change them together or not at all.
#[derive(Clone, Copy, Debug)]
pub struct GenConfig {
    /// Acceptance floor and backoff margin for equivalence candidates.
    pub min_equivalence_similarity: f64,
    /// Affinity a target pair needs before the pair shares a label.
    pub label_affinity_threshold: f64,
    /// Matching passes. The second pass re-matches with label feedback.
    pub num_iterations: usize,
    /// Detected elements smaller than this are treated as raw data.
    pub min_program_size: usize,
    /// Skip detection entirely and diff as raw bytes.
    pub force_raw: bool,
}

impl Default for GenConfig {
    fn default() -> Self {
        GenConfig {
            min_equivalence_similarity: 12.0,
            label_affinity_threshold: 64.0,
            num_iterations: 2,
            min_program_size: 16,
            force_raw: false,
        }
    }
}

/// Generates a patch transforming `old_image` into `new_image`.
///
/// Executable treatment is best-effort: if detection fails on either side,
/// the types disagree, or a disassembler misbehaves, generation degrades to
/// raw mode rather than failing.
pub fn generate(
    old_image: &[u8],
    new_image: &[u8],
    provider: &dyn DisassemblerProvider,
    config: &GenConfig,
) -> Result<Patch, Error> {
    if old_image.len() > u32::MAX as usize || new_image.len() > u32::MAX as usize {
        return Err(Error::ImageTooLarge);
    }

    let detected = if config.force_raw {
        None
    } else {
        match (
            detect_element(provider, old_image, config.min_program_size),
            detect_element(provider, new_image, config.min_program_size),
        ) {
            (Some((old_element, old_disasm)), Some((new_element, new_disasm)))
                if old_element.exe_type == new_element.exe_type =>
            {
                info!(
                    "detected executable type {}: {} -> {} bytes",
                    old_element.exe_type.code(),
                    old_element.size,
                    new_element.size
                );
                Some((old_element.exe_type, old_disasm, new_disasm))
            }
            (Some(_), Some(_)) => {
                warn!("executable types disagree; falling back to raw mode");
                None
            }
            _ => None,
        }
    };

    let element = match detected {
        Some((exe_type, old_disasm, new_disasm)) => {
            match generate_executable_element(
                exe_type,
                old_image,
                new_image,
                &*old_disasm,
                &*new_disasm,
                config,
            ) {
                Ok(element) => element,
                Err(err) => {
                    warn!("executable element failed ({err}); falling back to raw mode");
                    generate_raw_element(old_image, new_image, config)
                }
            }
        }
        None => generate_raw_element(old_image, new_image, config),
    };

    let patch = Patch {
        header: PatchHeader {
            old_size: old_image.len() as Offset,
            old_checksum: checksum(old_image),
            new_size: new_image.len() as Offset,
            new_checksum: checksum(new_image),
        },
        elements: vec![element],
    };
    debug_assert!(apply::apply(old_image, &patch, provider).is_ok_and(|out| out == new_image));
    Ok(patch)
}

/// Diffs the images as plain bytes, references ignored.
pub fn generate_raw_element(old_image: &[u8], new_image: &[u8], config: &GenConfig) -> PatchElement {
    let old_index = ImageIndex::new(old_image);
    let new_index = ImageIndex::new(new_image);
    let equivalence_map = create_equivalence_map(&old_index, &new_index, config);

    let mut element =
        PatchElement::new(ExecutableType::Raw, old_image.len() as Offset, new_image.len() as Offset);
    emit_equivalences_and_extra_data(new_image, &equivalence_map, &mut element);
    emit_raw_delta(old_image, new_image, &new_index, &equivalence_map, &mut element);
    element
}

/// Diffs two images of the same executable type with reference awareness.
pub fn generate_executable_element(
    exe_type: ExecutableType,
    old_image: &[u8],
    new_image: &[u8],
    old_disasm: &dyn Disassembler,
    new_disasm: &dyn Disassembler,
    config: &GenConfig,
) -> Result<PatchElement, Error> {
    let mut old_index = ImageIndex::new(old_image);
    old_index.initialize(old_disasm)?;
    let mut new_index = ImageIndex::new(new_image);
    new_index.initialize(new_disasm)?;
    if old_index.type_count() != new_index.type_count()
        || old_index.pool_count() != new_index.pool_count()
    {
        return Err(Error::Disassembly("reference layouts disagree between versions"));
    }

    let equivalence_map = create_equivalence_map(&old_index, &new_index, config);
    let offset_mapper = OffsetMapper::from_equivalence_map(&equivalence_map);

    let mut element =
        PatchElement::new(exe_type, old_image.len() as Offset, new_image.len() as Offset);
    for (pool_tag, old_pool) in old_index.target_pools() {
        let mut projected = old_pool.clone();
        projected.project(&offset_mapper);
        let extra = find_extra_targets(&projected, new_index.pool(pool_tag));
        projected.insert_targets(&extra);
        element.extra_targets.push(extra);

        for &type_tag in old_pool.types() {
            generate_references_delta(
                old_index.refs(type_tag),
                new_index.refs(type_tag),
                old_pool,
                new_index.pool(pool_tag),
                &projected,
                &offset_mapper,
                &equivalence_map,
                &mut element.reference_delta,
            );
        }
    }
    emit_equivalences_and_extra_data(new_image, &equivalence_map, &mut element);
    emit_raw_delta(old_image, new_image, &new_index, &equivalence_map, &mut element);
    Ok(element)
}

/// Runs the iterated matching loop and returns the final map.
pub fn create_equivalence_map(
    old_index: &ImageIndex,
    new_index: &ImageIndex,
    config: &GenConfig,
) -> EquivalenceMap {
    let pool_count = old_index.pool_count();
    let mut affinities = vec![TargetsAffinity::default(); pool_count];
    let mut equivalence_map = EquivalenceMap::new();

    for iteration in 0..config.num_iterations.max(1) {
        let mut old_view = EncodedView::new(old_index);
        let mut new_view = EncodedView::new(new_index);
        for pool_idx in 0..pool_count {
            let pool_tag = PoolTag(pool_idx as u8);
            affinities[pool_idx].infer_from_similarities(
                &equivalence_map,
                old_index.pool(pool_tag).targets(),
                new_index.pool(pool_tag).targets(),
            );
            let mut old_labels = Vec::new();
            let mut new_labels = Vec::new();
            let bound = affinities[pool_idx].assign_labels(
                config.label_affinity_threshold,
                &mut old_labels,
                &mut new_labels,
            );
            old_view.set_labels(pool_tag, old_labels, bound);
            new_view.set_labels(pool_tag, new_labels, bound);
        }

        let old_sa = make_suffix_array(&old_view.symbols(), old_view.cardinality());
        equivalence_map.build(
            &old_sa,
            &old_view,
            &new_view,
            &affinities,
            config.min_equivalence_similarity,
        );
        info!(
            "pass {}: {} equivalences covering {} of {} bytes",
            iteration + 1,
            equivalence_map.len(),
            equivalence_map.coverage(),
            new_index.size()
        );
    }
    equivalence_map
}

// New targets with no counterpart in the projected old pool.
fn find_extra_targets(projected_old: &TargetPool, new_pool: &TargetPool) -> Vec<Offset> {
    let old = projected_old.targets();
    let new = new_pool.targets();
    let mut extra = Vec::new();
    let mut old_pos = 0usize;
    for &target in new {
        while old_pos < old.len() && old[old_pos] < target {
            old_pos += 1;
        }
        if old_pos >= old.len() || old[old_pos] != target {
            extra.push(target);
        }
    }
    extra
}

// Walks equivalences in destination order and emits one signed key delta
// per new reference fully inside an equivalence. The source reference is
// found by location lockstep; application repeats the identical walk, so
// stream order is part of the format.
#[allow(clippy::too_many_arguments)]
fn generate_references_delta(
    src_refs: &ReferenceSet,
    dst_refs: &ReferenceSet,
    old_pool: &TargetPool,
    new_pool: &TargetPool,
    projected_pool: &TargetPool,
    mapper: &OffsetMapper,
    equivalence_map: &EquivalenceMap,
    sink: &mut Vec<i32>,
) {
    let width = src_refs.width();
    let src_list = src_refs.references();
    let dst_list = dst_refs.references();
    let mut dst_pos = 0usize;

    for candidate in equivalence_map.iter() {
        let equiv = candidate.eq;
        while dst_pos < dst_list.len() && dst_list[dst_pos].location < equiv.dst_offset {
            dst_pos += 1;
        }
        if dst_pos >= dst_list.len() {
            break;
        }
        if dst_list[dst_pos].location >= equiv.dst_end() {
            continue;
        }
        let src_location = equiv.src_offset + (dst_list[dst_pos].location - equiv.dst_offset);
        let mut src_pos = src_list.partition_point(|r| r.location < src_location);
        while dst_pos < dst_list.len() && dst_list[dst_pos].location + width <= equiv.dst_end() {
            let Some(src_ref) = src_list.get(src_pos) else {
                break;
            };
            let dst_ref = dst_list[dst_pos];
            let old_target = old_pool.offset_for_key(src_ref.target_key);
            let expected_key = projected_pool.key_for_offset(mapper.project_offset(old_target));
            let new_target = new_pool.offset_for_key(dst_ref.target_key);
            let new_key = projected_pool.key_for_offset(new_target);
            sink.push((i64::from(new_key) - i64::from(expected_key)) as i32);
            dst_pos += 1;
            src_pos += 1;
        }
    }
}

// Emits the equivalence list and, interleaved in destination order, the new
// bytes no equivalence covers.
fn emit_equivalences_and_extra_data(
    new_image: &[u8],
    equivalence_map: &EquivalenceMap,
    element: &mut PatchElement,
) {
    let mut dst_offset: Offset = 0;
    for candidate in equivalence_map.iter() {
        element.equivalences.push(candidate.eq);
        element
            .extra_data
            .extend_from_slice(&new_image[dst_offset as usize..candidate.eq.dst_offset as usize]);
        dst_offset = candidate.eq.dst_end();
    }
    element.extra_data.extend_from_slice(&new_image[dst_offset as usize..]);
}

// Emits sparse byte corrections for covered non-reference bytes, addressed
// by cumulative copy offset. Reference bytes are skipped: the reference
// delta stream corrects them wholesale.
fn emit_raw_delta(
    old_image: &[u8],
    new_image: &[u8],
    new_index: &ImageIndex,
    equivalence_map: &EquivalenceMap,
    element: &mut PatchElement,
) {
    let mut base_copy_offset: Offset = 0;
    for candidate in equivalence_map.iter() {
        let eq = candidate.eq;
        for i in 0..eq.length {
            if new_index.is_reference(eq.dst_offset + i) {
                continue;
            }
            let old_byte = old_image[(eq.src_offset + i) as usize];
            let new_byte = new_image[(eq.dst_offset + i) as usize];
            if old_byte != new_byte {
                element.raw_delta.push(RawDeltaUnit {
                    copy_offset: base_copy_offset + i,
                    diff: new_byte.wrapping_sub(old_byte) as i8,
                });
            }
        }
        base_copy_offset += eq.length;
    }
}
