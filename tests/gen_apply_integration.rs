// End-to-end generate/apply tests over a toy tagged executable format.
//
// The format encodes two reference types, each 3 bytes wide: a marker byte
// (0xFA for type 0, 0xFB for type 1) followed by a little-endian u16 target
// offset. Each type draws from its own target pool. Fixture bytes outside
// references stay below 0xFA so the scanner never sees a phantom marker.

use refdelta::apply;
use refdelta::disasm::{
    Disassembler, DisassemblerProvider, ExecutableType, NoOpDisassembler,
};
use refdelta::generate::{self, GenConfig};
use refdelta::image::{Offset, PoolTag, Reference, ReferenceTypeTraits, TypeTag};
use refdelta::patch::Patch;

const MARKERS: [u8; 2] = [0xFA, 0xFB];
const REF_WIDTH: Offset = 3;
const TAGGED_CODE: u8 = 0x54;

struct TaggedDisassembler;

impl TaggedDisassembler {
    fn is_marker(byte: u8) -> bool {
        MARKERS.contains(&byte)
    }
}

impl Disassembler for TaggedDisassembler {
    fn exe_type(&self) -> ExecutableType {
        ExecutableType::Custom(TAGGED_CODE)
    }

    fn reference_groups(&self) -> Vec<ReferenceTypeTraits> {
        (0..2)
            .map(|idx| ReferenceTypeTraits {
                width: REF_WIDTH,
                type_tag: TypeTag(idx),
                pool_tag: PoolTag(idx),
            })
            .collect()
    }

    fn read_references(&self, traits: ReferenceTypeTraits, image: &[u8]) -> Vec<Reference> {
        let marker = MARKERS[usize::from(traits.type_tag.0)];
        let mut refs = Vec::new();
        let mut pos = 0usize;
        // Skip the full encoding of either marker type so target bytes are
        // never themselves mistaken for markers.
        while pos + REF_WIDTH as usize <= image.len() {
            if Self::is_marker(image[pos]) {
                if image[pos] == marker {
                    let target = u16::from_le_bytes([image[pos + 1], image[pos + 2]]);
                    refs.push(Reference {
                        location: pos as Offset,
                        target: Offset::from(target),
                    });
                }
                pos += REF_WIDTH as usize;
            } else {
                pos += 1;
            }
        }
        refs
    }

    fn write_reference(&self, traits: ReferenceTypeTraits, image: &mut [u8], reference: Reference) {
        let pos = reference.location as usize;
        image[pos] = MARKERS[usize::from(traits.type_tag.0)];
        let target = u16::try_from(reference.target).expect("target exceeds u16 encoding");
        image[pos + 1..pos + 3].copy_from_slice(&target.to_le_bytes());
    }
}

struct TaggedProvider;

impl DisassemblerProvider for TaggedProvider {
    fn detect(&self, image: &[u8]) -> Option<Box<dyn Disassembler>> {
        if image.iter().any(|&b| TaggedDisassembler::is_marker(b)) {
            Some(Box::new(TaggedDisassembler))
        } else {
            None
        }
    }

    fn for_type(&self, exe_type: ExecutableType) -> Option<Box<dyn Disassembler>> {
        match exe_type {
            ExecutableType::Raw => Some(Box::new(NoOpDisassembler)),
            ExecutableType::Custom(TAGGED_CODE) => Some(Box::new(TaggedDisassembler)),
            ExecutableType::Custom(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Fixture assembly
// ---------------------------------------------------------------------------

enum Piece {
    Bytes(&'static [u8]),
    Call(u16), // type 0 reference
    Jump(u16), // type 1 reference
}

fn assemble(pieces: &[Piece]) -> Vec<u8> {
    let mut image = Vec::new();
    for piece in pieces {
        match piece {
            Piece::Bytes(bytes) => image.extend_from_slice(bytes),
            Piece::Call(target) => {
                image.push(MARKERS[0]);
                image.extend_from_slice(&target.to_le_bytes());
            }
            Piece::Jump(target) => {
                image.push(MARKERS[1]);
                image.extend_from_slice(&target.to_le_bytes());
            }
        }
    }
    image
}

fn roundtrip(old: &[u8], new: &[u8], provider: &dyn DisassemblerProvider) -> Patch {
    let patch = generate::generate(old, new, provider, &GenConfig::default()).unwrap();
    assert_eq!(apply::apply(old, &patch, provider).unwrap(), new);
    patch
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn identity_with_references() {
    let image = assemble(&[
        Piece::Bytes(b"prologue bytes "),
        Piece::Call(4),
        Piece::Bytes(b" body body body "),
        Piece::Jump(20),
        Piece::Bytes(b" epilogue"),
    ]);
    let patch = roundtrip(&image, &image, &TaggedProvider);
    let element = &patch.elements[0];
    assert_eq!(element.exe_type, ExecutableType::Custom(TAGGED_CODE));
    assert_eq!(element.equivalences.len(), 1);
    assert!(element.extra_data.is_empty());
    assert!(element.raw_delta.is_empty());
    assert!(element.reference_delta.iter().all(|&d| d == 0));
}

#[test]
fn shifted_references_roundtrip() {
    // The new image inserts bytes near the front, shifting every later
    // reference location, and retargets one call.
    let old = assemble(&[
        Piece::Bytes(b"header section "),
        Piece::Call(2),
        Piece::Bytes(b" shared function body one "),
        Piece::Call(8),
        Piece::Bytes(b" shared function body two "),
        Piece::Jump(40),
        Piece::Bytes(b" trailer"),
    ]);
    let new = assemble(&[
        Piece::Bytes(b"header section PADDED "),
        Piece::Call(2),
        Piece::Bytes(b" shared function body one "),
        Piece::Call(15),
        Piece::Bytes(b" shared function body two "),
        Piece::Jump(47),
        Piece::Bytes(b" trailer"),
    ]);
    roundtrip(&old, &new, &TaggedProvider);
}

#[test]
fn new_reference_type_instances_roundtrip() {
    // The new image grows an extra jump whose target exists in no old pool,
    // exercising the extra-targets stream.
    let old = assemble(&[
        Piece::Bytes(b"some stable leading content "),
        Piece::Call(4),
        Piece::Bytes(b" and stable trailing content"),
    ]);
    let new = assemble(&[
        Piece::Bytes(b"some stable leading content "),
        Piece::Call(4),
        Piece::Jump(33),
        Piece::Bytes(b" and stable trailing content"),
    ]);
    roundtrip(&old, &new, &TaggedProvider);
}

#[test]
fn plain_edit_between_references_roundtrip() {
    let old = assemble(&[
        Piece::Bytes(b"abcdefghijklmnop"),
        Piece::Jump(3),
        Piece::Bytes(b"qrstuvwxyz012345"),
    ]);
    let mut new = old.clone();
    // Single-byte substitution in covered plain data rides the raw delta.
    new[5] = b'X';
    roundtrip(&old, &new, &TaggedProvider);
}

#[test]
fn raw_images_roundtrip() {
    let provider = TaggedProvider;
    roundtrip(b"", b"", &provider);
    roundtrip(b"", b"entirely new content", &provider);
    roundtrip(b"entirely old content", b"", &provider);
    roundtrip(
        b"The quick brown fox jumps over the lazy dog",
        b"Pack my box with five dozen liquor jugs!!!!",
        &provider,
    );
}

#[test]
fn force_raw_ignores_references() {
    let old = assemble(&[
        Piece::Bytes(b"stable stable stable stable "),
        Piece::Call(4),
        Piece::Bytes(b" stable stable stable stable"),
    ]);
    let mut new = old.clone();
    new.extend_from_slice(b" tail");
    let config = GenConfig { force_raw: true, ..GenConfig::default() };
    let patch = generate::generate(&old, &new, &TaggedProvider, &config).unwrap();
    assert_eq!(patch.elements[0].exe_type, ExecutableType::Raw);
    assert!(patch.elements[0].reference_delta.is_empty());
    assert_eq!(apply::apply(&old, &patch, &TaggedProvider).unwrap(), new);
}

#[test]
fn serialized_patch_applies_identically() {
    let old = assemble(&[
        Piece::Bytes(b"serialize me: some content "),
        Piece::Call(6),
        Piece::Bytes(b" and a bit more content here"),
    ]);
    let new = assemble(&[
        Piece::Bytes(b"serialize me: some content "),
        Piece::Call(9),
        Piece::Bytes(b" and a bit more content HERE"),
    ]);
    let patch = roundtrip(&old, &new, &TaggedProvider);
    let bytes = patch.serialize();
    let decoded = Patch::deserialize(&bytes).unwrap();
    assert_eq!(apply::apply(&old, &decoded, &TaggedProvider).unwrap(), new);
    assert_eq!(decoded.serialize(), bytes);
}
