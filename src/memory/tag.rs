//! Boundary-tag encoding.
//!
//! Every span in a region carries one 32-bit word immediately before its
//! payload (the header) and one immediately after it (the footer). The top two
//! bits hold the span kind, the low 30 bits hold the payload size in bytes.
//! Nothing outside this module sees the packed word.

/// Bytes occupied by one boundary tag.
pub const TAG_BYTES: usize = 4;

/// Bytes of overhead per span (header + footer).
pub const SPAN_OVERHEAD: usize = 2 * TAG_BYTES;

/// Largest payload size a tag can describe.
pub const MAX_SPAN_SIZE: usize = SIZE_MASK as usize;

const SIZE_MASK: u32 = 0x3FFF_FFFF;
const KIND_SHIFT: u32 = 30;

/// What occupies a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    Free,
    Allocated,
    Stealable,
}

impl SpanKind {
    fn bits(self) -> u32 {
        match self {
            Self::Free => 0b01,
            Self::Allocated => 0b10,
            Self::Stealable => 0b11,
        }
    }

    fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0b01 => Some(Self::Free),
            0b10 => Some(Self::Allocated),
            0b11 => Some(Self::Stealable),
            // Zeroed memory never decodes as a valid tag.
            _ => None,
        }
    }

    /// True for spans that hold a live allocation.
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Free)
    }
}

/// Decoded boundary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryTag {
    pub kind: SpanKind,
    pub size: usize,
}

impl BoundaryTag {
    pub fn new(kind: SpanKind, size: usize) -> Self {
        debug_assert!(size <= MAX_SPAN_SIZE, "span size {size} overflows tag");
        Self { kind, size }
    }

    pub fn free(size: usize) -> Self {
        Self::new(SpanKind::Free, size)
    }

    fn encode(self) -> u32 {
        (self.kind.bits() << KIND_SHIFT) | (self.size as u32 & SIZE_MASK)
    }

    fn decode(word: u32) -> Option<Self> {
        let kind = SpanKind::from_bits(word >> KIND_SHIFT)?;
        Some(Self {
            kind,
            size: (word & SIZE_MASK) as usize,
        })
    }
}

/// Byte storage backing a region, addressed by offset.
///
/// Tag reads and writes are bounds-checked slice accesses; a tag that fails to
/// decode is reported as `None` so callers can classify it as corruption.
pub(crate) struct TagStore {
    bytes: Box<[u8]>,
}

impl TagStore {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
        }
    }

    pub fn read(&self, offset: usize) -> Option<BoundaryTag> {
        let word = self.bytes.get(offset..offset + TAG_BYTES)?;
        let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        BoundaryTag::decode(word)
    }

    pub fn write(&mut self, offset: usize, tag: BoundaryTag) {
        self.bytes[offset..offset + TAG_BYTES].copy_from_slice(&tag.encode().to_le_bytes());
    }

    /// Write matching header and footer for the span whose payload starts at `payload`.
    pub fn write_span(&mut self, payload: usize, tag: BoundaryTag) {
        self.write(payload - TAG_BYTES, tag);
        self.write(payload + tag.size, tag);
    }

    pub fn payload(&self, payload: usize, size: usize) -> &[u8] {
        &self.bytes[payload..payload + size]
    }

    pub fn payload_mut(&mut self, payload: usize, size: usize) -> &mut [u8] {
        &mut self.bytes[payload..payload + size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_survives_store() {
        let mut store = TagStore::new(64);
        let tag = BoundaryTag::new(SpanKind::Stealable, 1_048_576);
        store.write(8, tag);
        assert_eq!(store.read(8), Some(tag));
    }

    #[test]
    fn test_zeroed_word_is_not_a_tag() {
        let store = TagStore::new(16);
        assert_eq!(store.read(0), None);
    }

    #[test]
    fn test_out_of_bounds_read_is_none() {
        let store = TagStore::new(16);
        assert_eq!(store.read(14), None);
    }

    #[test]
    fn test_write_span_places_header_and_footer() {
        let mut store = TagStore::new(64);
        store.write_span(8, BoundaryTag::free(24));
        assert_eq!(store.read(4), store.read(32));
        assert_eq!(store.read(4).map(|t| t.size), Some(24));
    }

    #[test]
    fn test_max_size_fits() {
        let tag = BoundaryTag::new(SpanKind::Allocated, MAX_SPAN_SIZE);
        assert_eq!(BoundaryTag::decode(tag.encode()), Some(tag));
    }
}
