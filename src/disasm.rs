// Disassembler seam: the engine never parses executable formats itself.
// A `Disassembler` describes one format's reference types and can read and
// rewrite references; a `DisassemblerProvider` probes images and resolves
// the type codes recorded in patches. The crate ships only the trivial
// raw implementation.

use crate::image::{Offset, Reference, ReferenceTypeTraits};

/// Executable formats as recorded in patches. `Custom` codes identify
/// caller-supplied disassemblers; zero is reserved for raw data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutableType {
    Raw,
    Custom(u8),
}

impl ExecutableType {
    pub fn code(self) -> u8 {
        match self {
            ExecutableType::Raw => 0,
            ExecutableType::Custom(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ExecutableType::Raw,
            code => ExecutableType::Custom(code),
        }
    }
}

/// One executable format. Implementations are stateless with respect to the
/// image: every method receives the bytes it operates on.
pub trait Disassembler {
    fn exe_type(&self) -> ExecutableType;

    /// Reference type descriptions, dense and ordered by type tag.
    fn reference_groups(&self) -> Vec<ReferenceTypeTraits>;

    /// All references of one type, sorted by location, non-overlapping and
    /// in bounds. Violations are caught by `ImageIndex::initialize`.
    fn read_references(&self, traits: ReferenceTypeTraits, image: &[u8]) -> Vec<Reference>;

    /// Rewrites the complete `width`-byte encoding of `reference`.
    fn write_reference(&self, traits: ReferenceTypeTraits, image: &mut [u8], reference: Reference);
}

/// Raw data: no references at all.
pub struct NoOpDisassembler;

impl Disassembler for NoOpDisassembler {
    fn exe_type(&self) -> ExecutableType {
        ExecutableType::Raw
    }

    fn reference_groups(&self) -> Vec<ReferenceTypeTraits> {
        Vec::new()
    }

    fn read_references(&self, _traits: ReferenceTypeTraits, _image: &[u8]) -> Vec<Reference> {
        Vec::new()
    }

    fn write_reference(
        &self,
        _traits: ReferenceTypeTraits,
        _image: &mut [u8],
        _reference: Reference,
    ) {
        // No reference types, so never called.
    }
}

/// A detected element: a typed region of an image. Detection currently
/// claims whole images only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Element {
    pub exe_type: ExecutableType,
    pub size: usize,
}

/// The set of executable formats available to generation and application.
pub trait DisassemblerProvider {
    /// Probes `image` against the known formats, in priority order.
    /// `None` means no format claims the image.
    fn detect(&self, image: &[u8]) -> Option<Box<dyn Disassembler>>;

    /// Disassembler for a type code recorded in a patch.
    fn for_type(&self, exe_type: ExecutableType) -> Option<Box<dyn Disassembler>>;
}

/// Provider with no executable formats: everything is raw.
pub struct NoFormats;

impl DisassemblerProvider for NoFormats {
    fn detect(&self, _image: &[u8]) -> Option<Box<dyn Disassembler>> {
        None
    }

    fn for_type(&self, exe_type: ExecutableType) -> Option<Box<dyn Disassembler>> {
        match exe_type {
            ExecutableType::Raw => Some(Box::new(NoOpDisassembler)),
            ExecutableType::Custom(_) => None,
        }
    }
}

/// Runs detection and rejects claims too small to be worth structural
/// treatment.
pub fn detect_element(
    provider: &dyn DisassemblerProvider,
    image: &[u8],
    min_element_size: usize,
) -> Option<(Element, Box<dyn Disassembler>)> {
    let disasm = provider.detect(image)?;
    if image.len() < min_element_size {
        return None;
    }
    Some((
        Element { exe_type: disasm.exe_type(), size: image.len() },
        disasm,
    ))
}
