//! Persisted summary of a stored mapping.
//!
//! The header records how many entries a mapping holds and the range of source and target
//! indices that have ever been written. Readers consult it before touching any block so that
//! queries outside the used ranges are answered without I/O.
//!
//! # Format
//!
//! ```text
//! +------+------------+------------+------------+------------+-------+
//! | size | source.min | source.max | target.min | target.max | crc32 |
//! +------+------------+------------+------------+------------+-------+
//!   u64      u64          u64          u64          u64        u32
//! ```
//!
//! All integers are big-endian. Range bounds are stored as `bound + 1` so that a zeroed header
//! decodes as an empty mapping with unset ranges. The checksum covers every preceding byte.

use crate::index::Span;
use bytes::{Buf, BufMut};

/// Encoded length of a [Header].
pub const SIZE: usize = 5 * u64::BITS as usize / 8 + u32::BITS as usize / 8;

/// Entry count and used index ranges of a stored mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Header {
    size: u64,
    sources: Option<Span>,
    targets: Option<Span>,
}

impl Header {
    /// Number of entries written.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Range of source indices ever written.
    pub fn sources(&self) -> Option<Span> {
        self.sources
    }

    /// Range of target indices ever written.
    pub fn targets(&self) -> Option<Span> {
        self.targets
    }

    pub fn grow_size(&mut self, by: u64) {
        self.size = self.size.saturating_add(by);
    }

    pub fn update_used_index(&mut self, index: u64) {
        self.update_used_indices(Span::single(index));
    }

    pub fn update_used_indices(&mut self, span: Span) {
        self.sources = Some(extend(self.sources, span));
    }

    pub fn update_target_index(&mut self, target: u64) {
        self.update_target_indices(Span::single(target));
    }

    pub fn update_target_indices(&mut self, span: Span) {
        self.targets = Some(extend(self.targets, span));
    }

    /// Whether `index` lies within the used source range.
    pub fn is_used_index(&self, index: u64) -> bool {
        self.sources.is_some_and(|sources| sources.contains(index))
    }

    /// Whether `target` lies within the used target range.
    pub fn is_used_target(&self, target: u64) -> bool {
        self.targets.is_some_and(|targets| targets.contains(target))
    }

    /// Portion of `[from, to]` that overlaps the used source range.
    pub fn used_indices(&self, from: u64, to: u64) -> Option<Span> {
        let window = Span::checked(from, to)?;
        self.sources?.intersect(&window)
    }

    /// Portion of `span` that overlaps the used target range.
    pub fn used_targets(&self, span: Span) -> Option<Span> {
        self.targets?.intersect(&span)
    }

    /// Serialize the header, appending its checksum.
    ///
    /// # Panics
    ///
    /// Panics if a recorded bound is `u64::MAX`.
    pub fn encode(&self) -> [u8; SIZE] {
        let mut buf = [0u8; SIZE];
        let mut dst = &mut buf[..];
        dst.put_u64(self.size);
        put_range(&mut dst, self.sources);
        put_range(&mut dst, self.targets);
        let crc = crc32fast::hash(&buf[..SIZE - 4]);
        (&mut buf[SIZE - 4..]).put_u32(crc);
        buf
    }

    /// Deserialize a header, returning `None` if the checksum does not match or a range is
    /// malformed.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != SIZE {
            return None;
        }
        let stored = (&buf[SIZE - 4..]).get_u32();
        let computed = crc32fast::hash(&buf[..SIZE - 4]);
        if stored != computed {
            return None;
        }

        let mut src = buf;
        let size = src.get_u64();
        let sources = get_range(&mut src)?;
        let targets = get_range(&mut src)?;
        Some(Self {
            size,
            sources,
            targets,
        })
    }
}

fn extend(current: Option<Span>, span: Span) -> Span {
    match current {
        Some(current) => current.merge(&span),
        None => span,
    }
}

fn put_range(dst: &mut impl BufMut, range: Option<Span>) {
    match range {
        Some(range) => {
            dst.put_u64(range.begin() + 1);
            dst.put_u64(range.end() + 1);
        }
        None => {
            dst.put_u64(0);
            dst.put_u64(0);
        }
    }
}

/// Outer `None` on a malformed range, inner `None` on an unset one.
fn get_range(src: &mut impl Buf) -> Option<Option<Span>> {
    let min = src.get_u64();
    let max = src.get_u64();
    match (min, max) {
        (0, 0) => Some(None),
        (0, _) | (_, 0) => None,
        (min, max) => Span::checked(min - 1, max - 1).map(Some),
    }
}
