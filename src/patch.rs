// Patch container: the in-memory model of a patch and its binary
// serialization.
//
// Layout: fixed magic, then varint-coded fields. Sorted streams are
// delta-coded (gaps), signed streams zigzag-coded. The reader validates
// structure up front so application never has to bounds-check mid-stream.

use simd_adler32::Adler32;

use crate::disasm::ExecutableType;
use crate::error::Error;
use crate::image::{Equivalence, Offset};
use crate::varint;

const MAGIC: &[u8; 4] = b"RDLT";
const VERSION: u32 = 1;

/// Adler-32 of an image, as stored in the patch header.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Adler32::new();
    hasher.write(data);
    hasher.finish()
}

/// One sparse byte correction inside copied regions. `copy_offset` counts
/// bytes across all equivalences in destination order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawDeltaUnit {
    pub copy_offset: Offset,
    pub diff: i8,
}

/// The streams for one element.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchElement {
    pub exe_type: ExecutableType,
    pub old_size: Offset,
    pub new_size: Offset,
    /// Sorted by `dst_offset`, non-overlapping in destination coordinates.
    pub equivalences: Vec<Equivalence>,
    /// New-image bytes not covered by any equivalence, in order.
    pub extra_data: Vec<u8>,
    /// Sorted by `copy_offset`, strictly increasing.
    pub raw_delta: Vec<RawDeltaUnit>,
    /// `new_key - expected_key` per corrected reference, in the generator's
    /// walk order.
    pub reference_delta: Vec<i32>,
    /// Per pool tag: new targets absent from the projected old pool,
    /// strictly increasing.
    pub extra_targets: Vec<Vec<Offset>>,
}

impl PatchElement {
    pub fn new(exe_type: ExecutableType, old_size: Offset, new_size: Offset) -> Self {
        PatchElement {
            exe_type,
            old_size,
            new_size,
            equivalences: Vec::new(),
            extra_data: Vec::new(),
            raw_delta: Vec::new(),
            reference_delta: Vec::new(),
            extra_targets: Vec::new(),
        }
    }

    /// Total bytes covered by equivalences.
    pub fn covered(&self) -> u64 {
        self.equivalences.iter().map(|eq| u64::from(eq.length)).sum()
    }

    /// Checks every structural invariant of the streams.
    pub fn validate(&self) -> Result<(), Error> {
        let mut dst_end: Offset = 0;
        let mut covered: u64 = 0;
        for eq in &self.equivalences {
            if eq.length == 0 {
                return Err(Error::InvalidPatch("empty equivalence"));
            }
            if eq.dst_offset < dst_end {
                return Err(Error::InvalidPatch("equivalences overlap in destination"));
            }
            if u64::from(eq.src_offset) + u64::from(eq.length) > u64::from(self.old_size) {
                return Err(Error::InvalidPatch("equivalence exceeds old image"));
            }
            if u64::from(eq.dst_offset) + u64::from(eq.length) > u64::from(self.new_size) {
                return Err(Error::InvalidPatch("equivalence exceeds new image"));
            }
            dst_end = eq.dst_end();
            covered += u64::from(eq.length);
        }
        if covered + self.extra_data.len() as u64 != u64::from(self.new_size) {
            return Err(Error::InvalidPatch("extra data does not fill the gaps"));
        }
        let mut prev: Option<Offset> = None;
        for unit in &self.raw_delta {
            if prev.is_some_and(|p| unit.copy_offset <= p) {
                return Err(Error::InvalidPatch("raw delta not strictly increasing"));
            }
            if u64::from(unit.copy_offset) >= covered {
                return Err(Error::InvalidPatch("raw delta beyond covered bytes"));
            }
            prev = Some(unit.copy_offset);
        }
        for targets in &self.extra_targets {
            if !targets.windows(2).all(|w| w[0] < w[1]) {
                return Err(Error::InvalidPatch("extra targets not strictly increasing"));
            }
            if targets.last().is_some_and(|&t| t >= self.new_size) {
                return Err(Error::InvalidPatch("extra target beyond new image"));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchHeader {
    pub old_size: Offset,
    pub old_checksum: u32,
    pub new_size: Offset,
    pub new_checksum: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    pub header: PatchHeader,
    pub elements: Vec<PatchElement>,
}

impl Patch {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        varint::put_u32(&mut out, VERSION);
        varint::put_u32(&mut out, self.header.old_size);
        out.extend_from_slice(&self.header.old_checksum.to_le_bytes());
        varint::put_u32(&mut out, self.header.new_size);
        out.extend_from_slice(&self.header.new_checksum.to_le_bytes());
        varint::put_usize(&mut out, self.elements.len());
        for element in &self.elements {
            serialize_element(&mut out, element);
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Patch, Error> {
        let mut cursor = Cursor::new(data);
        if cursor.bytes(4)? != MAGIC {
            return Err(Error::InvalidPatch("bad magic"));
        }
        if cursor.u32()? != VERSION {
            return Err(Error::InvalidPatch("unsupported version"));
        }
        let old_size = cursor.u32()?;
        let old_checksum = cursor.u32_le()?;
        let new_size = cursor.u32()?;
        let new_checksum = cursor.u32_le()?;
        let element_count = cursor.usize()?;
        if element_count == 0 {
            return Err(Error::InvalidPatch("no elements"));
        }
        let mut elements = Vec::with_capacity(element_count.min(16));
        for _ in 0..element_count {
            let element = deserialize_element(&mut cursor)?;
            element.validate()?;
            elements.push(element);
        }
        if !cursor.is_empty() {
            return Err(Error::InvalidPatch("trailing bytes"));
        }
        Ok(Patch {
            header: PatchHeader { old_size, old_checksum, new_size, new_checksum },
            elements,
        })
    }
}

fn serialize_element(out: &mut Vec<u8>, element: &PatchElement) {
    out.push(element.exe_type.code());
    varint::put_u32(out, element.old_size);
    varint::put_u32(out, element.new_size);

    varint::put_usize(out, element.equivalences.len());
    let mut dst_end: Offset = 0;
    for eq in &element.equivalences {
        varint::put_u32(out, eq.src_offset);
        varint::put_u32(out, eq.dst_offset - dst_end);
        varint::put_u32(out, eq.length);
        dst_end = eq.dst_end();
    }

    varint::put_usize(out, element.extra_data.len());
    out.extend_from_slice(&element.extra_data);

    varint::put_usize(out, element.raw_delta.len());
    let mut copy_offset: Offset = 0;
    for unit in &element.raw_delta {
        varint::put_u32(out, unit.copy_offset - copy_offset);
        out.push(unit.diff as u8);
        copy_offset = unit.copy_offset;
    }

    varint::put_usize(out, element.reference_delta.len());
    for &delta in &element.reference_delta {
        varint::put_i32(out, delta);
    }

    varint::put_usize(out, element.extra_targets.len());
    for targets in &element.extra_targets {
        varint::put_usize(out, targets.len());
        let mut prev: Offset = 0;
        for &target in targets {
            varint::put_u32(out, target - prev);
            prev = target;
        }
    }
}

fn deserialize_element(cursor: &mut Cursor) -> Result<PatchElement, Error> {
    let exe_type = ExecutableType::from_code(cursor.u8()?);
    let old_size = cursor.u32()?;
    let new_size = cursor.u32()?;
    let mut element = PatchElement::new(exe_type, old_size, new_size);

    let equivalence_count = cursor.usize()?;
    let mut dst_end: Offset = 0;
    element.equivalences.reserve(equivalence_count.min(1 << 16));
    for _ in 0..equivalence_count {
        let src_offset = cursor.u32()?;
        let dst_gap = cursor.u32()?;
        let length = cursor.u32()?;
        let dst_offset = dst_end
            .checked_add(dst_gap)
            .ok_or(Error::InvalidPatch("destination offset overflow"))?;
        dst_end = dst_offset
            .checked_add(length)
            .ok_or(Error::InvalidPatch("destination offset overflow"))?;
        element.equivalences.push(Equivalence { src_offset, dst_offset, length });
    }

    let extra_len = cursor.usize()?;
    element.extra_data = cursor.bytes(extra_len)?.to_vec();

    let raw_delta_count = cursor.usize()?;
    element.raw_delta.reserve(raw_delta_count.min(1 << 16));
    let mut copy_offset: Offset = 0;
    for i in 0..raw_delta_count {
        let gap = cursor.u32()?;
        if i > 0 && gap == 0 {
            return Err(Error::InvalidPatch("raw delta not strictly increasing"));
        }
        copy_offset = copy_offset
            .checked_add(gap)
            .ok_or(Error::InvalidPatch("copy offset overflow"))?;
        let diff = cursor.u8()? as i8;
        element.raw_delta.push(RawDeltaUnit { copy_offset, diff });
    }

    let reference_delta_count = cursor.usize()?;
    element.reference_delta.reserve(reference_delta_count.min(1 << 16));
    for _ in 0..reference_delta_count {
        element.reference_delta.push(cursor.i32()?);
    }

    let pool_count = cursor.usize()?;
    if pool_count > usize::from(u8::MAX) {
        return Err(Error::InvalidPatch("too many pools"));
    }
    for _ in 0..pool_count {
        let target_count = cursor.usize()?;
        let mut targets = Vec::with_capacity(target_count.min(1 << 16));
        let mut prev: Offset = 0;
        for i in 0..target_count {
            let gap = cursor.u32()?;
            if i > 0 && gap == 0 {
                return Err(Error::InvalidPatch("extra targets not strictly increasing"));
            }
            prev = prev
                .checked_add(gap)
                .ok_or(Error::InvalidPatch("target offset overflow"))?;
            targets.push(prev);
        }
        element.extra_targets.push(targets);
    }

    Ok(element)
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    fn u8(&mut self) -> Result<u8, Error> {
        let byte = *self
            .rest()
            .first()
            .ok_or(Error::InvalidPatch("truncated patch"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.rest().len() < len {
            return Err(Error::InvalidPatch("truncated patch"));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u32_le(&mut self) -> Result<u32, Error> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let (val, len) =
            varint::read_u32(self.rest()).map_err(|_| Error::InvalidPatch("bad varint"))?;
        self.pos += len;
        Ok(val)
    }

    fn i32(&mut self) -> Result<i32, Error> {
        let (val, len) =
            varint::read_i32(self.rest()).map_err(|_| Error::InvalidPatch("bad varint"))?;
        self.pos += len;
        Ok(val)
    }

    fn usize(&mut self) -> Result<usize, Error> {
        let (val, len) =
            varint::read_usize(self.rest()).map_err(|_| Error::InvalidPatch("bad varint"))?;
        self.pos += len;
        Ok(val)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
