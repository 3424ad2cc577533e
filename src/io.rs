// File-level generate/apply helpers.
//
// Both operations read their inputs fully into memory (offsets are 32-bit,
// so images are bounded), build or apply the patch, and only then write the
// output in one shot. A failed write removes the partial output file.

use std::fs;
use std::path::Path;

use crate::apply;
use crate::disasm::DisassemblerProvider;
use crate::error::Error;
use crate::generate::{self, GenConfig};
use crate::patch::Patch;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `generate_file()`.
#[derive(Debug, Clone)]
pub struct GenerateStats {
    /// Old image size in bytes.
    pub old_size: u64,
    /// New image size in bytes.
    pub new_size: u64,
    /// Serialized patch size in bytes.
    pub patch_size: u64,
    /// Equivalence count across all elements.
    pub equivalences: u64,
    /// New-image bytes covered by equivalences.
    pub covered: u64,
}

/// Statistics returned by `apply_file()`.
#[derive(Debug, Clone)]
pub struct ApplyStats {
    /// Old image size in bytes.
    pub old_size: u64,
    /// Patch file size in bytes.
    pub patch_size: u64,
    /// Reconstructed output size in bytes.
    pub new_size: u64,
}

// ---------------------------------------------------------------------------
// generate_file
// ---------------------------------------------------------------------------

/// Generates a patch from `old_path` to `new_path` and writes it to
/// `patch_path`.
pub fn generate_file(
    old_path: &Path,
    new_path: &Path,
    patch_path: &Path,
    provider: &dyn DisassemblerProvider,
    config: &GenConfig,
) -> Result<GenerateStats, Error> {
    let old_image = fs::read(old_path).map_err(Error::FileRead)?;
    let new_image = fs::read(new_path).map_err(Error::FileRead)?;

    let patch = generate::generate(&old_image, &new_image, provider, config)?;
    let bytes = patch.serialize();
    write_or_discard(patch_path, &bytes)?;

    Ok(GenerateStats {
        old_size: old_image.len() as u64,
        new_size: new_image.len() as u64,
        patch_size: bytes.len() as u64,
        equivalences: patch
            .elements
            .iter()
            .map(|e| e.equivalences.len() as u64)
            .sum(),
        covered: patch.elements.iter().map(|e| e.covered()).sum(),
    })
}

// ---------------------------------------------------------------------------
// apply_file
// ---------------------------------------------------------------------------

/// Applies the patch at `patch_path` to `old_path`, writing the
/// reconstructed image to `new_path`.
pub fn apply_file(
    old_path: &Path,
    patch_path: &Path,
    new_path: &Path,
    provider: &dyn DisassemblerProvider,
) -> Result<ApplyStats, Error> {
    let old_image = fs::read(old_path).map_err(Error::FileRead)?;
    let patch_bytes = fs::read(patch_path).map_err(Error::FileRead)?;

    let patch = Patch::deserialize(&patch_bytes)?;
    let new_image = apply::apply(&old_image, &patch, provider)?;
    write_or_discard(new_path, &new_image)?;

    Ok(ApplyStats {
        old_size: old_image.len() as u64,
        patch_size: patch_bytes.len() as u64,
        new_size: new_image.len() as u64,
    })
}

fn write_or_discard(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    fs::write(path, bytes).map_err(|err| {
        let _ = fs::remove_file(path);
        Error::FileWrite(err)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
